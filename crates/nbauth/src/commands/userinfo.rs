use super::{Command, call::resolve_token};
use crate::cli::ConnectArgs;
use async_trait::async_trait;
use eyre::{Result, eyre};
use nbauth_core::{ApiClient, Settings};
use std::io::Write;

pub struct UserinfoCommand {
    pub settings: Settings,
    pub token: Option<String>,
    pub connect: ConnectArgs,
}

#[async_trait]
impl Command for UserinfoCommand {
    async fn execute(&self) -> Result<()> {
        let token = resolve_token(&self.settings, self.token.as_deref(), &self.connect).await?;
        let info = ApiClient::new(self.settings.clone(), token)
            .userinfo()
            .await
            .map_err(|e| eyre!("Failed to fetch user info: {}", e))?;

        let mut stdout = std::io::stdout();
        if let Some(name) = &info.name {
            writeln!(stdout, "Name:    {name}")?;
        }
        if let Some(email) = &info.email {
            writeln!(stdout, "Email:   {email}")?;
        }
        if let Some(picture) = &info.picture {
            writeln!(stdout, "Picture: {picture}")?;
        }
        writeln!(stdout, "\n{}", serde_json::to_string_pretty(&info)?)?;
        Ok(())
    }
}
