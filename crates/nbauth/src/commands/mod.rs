use async_trait::async_trait;
use eyre::Result;

pub mod call;
pub mod connect;
pub mod userinfo;

#[async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}
