use clap::Parser;
use eyre::Result;

use nbauth::cli::config::load_settings;
use nbauth::cli::{Cli, Commands};
use nbauth::commands::{
    Command, call::CallCommand, connect::ConnectCommand, userinfo::UserinfoCommand,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Load .env first so env-backed flags can come from it
    nbauth::cli::config::load_env()?;

    let cli = Cli::parse();

    // Initialize tracing (level configured via RUST_LOG env var)
    nbauth::utils::tracing::init_tracing()?;

    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Connect(args) => ConnectCommand { settings, args }.execute().await,
        Commands::Call {
            path,
            data,
            strict,
            token,
            connect,
        } => {
            CallCommand {
                settings,
                path,
                data,
                strict,
                token,
                connect,
            }
            .execute()
            .await
        }
        Commands::Userinfo { token, connect } => {
            UserinfoCommand {
                settings,
                token,
                connect,
            }
            .execute()
            .await
        }
    }
}
