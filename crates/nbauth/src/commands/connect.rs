use super::Command;
use crate::cli::ConnectArgs;
use crate::presenter::{BrowserPresenter, HtmlPresenter, read_pasted_redirect};
use async_trait::async_trait;
use eyre::{Result, eyre};
use nbauth_core::{
    AccessToken, AuthError, ConnectOptions, FlowCoordinator, Presenter, Settings, Verification,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ConnectCommand {
    pub settings: Settings,
    pub args: ConnectArgs,
}

#[async_trait]
impl Command for ConnectCommand {
    async fn execute(&self) -> Result<()> {
        let token = obtain_token(&self.settings, &self.args).await?;
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", token.bearer)?;
        Ok(())
    }
}

pub fn connect_options(args: &ConnectArgs) -> ConnectOptions {
    ConnectOptions {
        mode: args.mode.into(),
        port: args.port,
        timeout: Duration::from_secs(args.timeout),
        origin_policy: args.origin_policy(),
        ..ConnectOptions::default()
    }
}

/// Run the flow described by `args` and return the token.
pub async fn obtain_token(settings: &Settings, args: &ConnectArgs) -> Result<AccessToken> {
    let presenter: Arc<dyn Presenter> = if args.manual {
        Arc::new(BrowserPresenter)
    } else {
        Arc::new(HtmlPresenter::new(args.html_out.clone()))
    };
    let mut coordinator =
        FlowCoordinator::new(settings.clone(), connect_options(args), presenter);

    if args.manual {
        return complete_manually(&mut coordinator).await;
    }

    match coordinator.connect().await {
        Ok(token) => {
            if coordinator.verification() == Some(Verification::Reused) {
                warn!("Using a token cached by the browser; it was not nonce-verified");
            }
            Ok(token)
        }
        Err(e @ AuthError::Timeout { .. }) => Err(eyre!(
            "{}. Re-run `nbauth connect`, or use --manual if the relay cannot reach the listener.",
            e
        )),
        Err(e) => Err(eyre!("Authorization failed: {}", e)),
    }
}

async fn complete_manually(coordinator: &mut FlowCoordinator) -> Result<AccessToken> {
    coordinator
        .start()
        .await
        .map_err(|e| eyre!("Failed to start authorization: {}", e))?;

    let redirect = read_pasted_redirect()
        .await
        .map_err(|e| eyre!("Failed to read redirect URL: {}", e))?;

    // The browser relay may have won the race while the user was pasting.
    if let Some(token) = coordinator.check().await {
        info!("Token arrived through the relay before the pasted URL");
        return Ok(token);
    }

    let token = coordinator
        .complete_from_redirect(&redirect)
        .await
        .map_err(|e| eyre!("Failed to complete authorization: {}", e))?;
    Ok(token)
}
