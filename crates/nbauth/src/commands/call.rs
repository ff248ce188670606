use super::{Command, connect::obtain_token};
use crate::cli::ConnectArgs;
use async_trait::async_trait;
use eyre::{Result, eyre};
use nbauth_core::{AccessToken, ApiClient, Settings};
use serde_json::Value;
use std::io::Write;

pub struct CallCommand {
    pub settings: Settings,
    pub path: String,
    pub data: Option<String>,
    pub strict: bool,
    pub token: Option<String>,
    pub connect: ConnectArgs,
}

#[async_trait]
impl Command for CallCommand {
    async fn execute(&self) -> Result<()> {
        let body = self.data.as_deref().map(parse_body).transpose()?;
        let token = resolve_token(&self.settings, self.token.as_deref(), &self.connect).await?;

        let client = ApiClient::new(self.settings.clone(), token);
        let response = client
            .call(&self.path, body.as_ref(), self.strict)
            .await
            .map_err(|e| eyre!("API call failed: {}", e))?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", serde_json::to_string_pretty(&response.body)?)?;
        Ok(())
    }
}

/// An explicit token when given, otherwise the result of a fresh flow.
pub async fn resolve_token(
    settings: &Settings,
    token: Option<&str>,
    connect: &ConnectArgs,
) -> Result<AccessToken> {
    match token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(bearer) => Ok(AccessToken::new(bearer, None)),
        None => obtain_token(settings, connect).await,
    }
}

fn parse_body(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| eyre!("--data is not valid JSON: {}", e))
}
