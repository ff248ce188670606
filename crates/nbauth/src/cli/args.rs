use clap::{Args, Parser, Subcommand, ValueEnum};
use nbauth_core::{LaunchMode, OriginPolicy};
use std::path::PathBuf;

/// Obtain OAuth2 access tokens for notebook sessions and call APIs with them.
#[derive(Parser)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// Path to a settings file (TOML). Defaults to the user config directory,
    /// then the JUPYTER_* environment variables
    #[arg(long, global = true, env = "NBAUTH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the authorization flow and print the access token
    Connect(ConnectArgs),
    /// Call an API endpoint with a bearer token
    Call {
        /// Path under the API audience, or an absolute URL
        path: String,
        /// JSON body; sends a POST when given, a GET otherwise
        #[arg(long)]
        data: Option<String>,
        /// Fail on error statuses instead of printing the response
        #[arg(long)]
        strict: bool,
        /// Access token to use instead of running the flow
        #[arg(long, env = "NBAUTH_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,
        #[command(flatten)]
        connect: ConnectArgs,
    },
    /// Show the signed-in user's profile
    Userinfo {
        /// Access token to use instead of running the flow
        #[arg(long, env = "NBAUTH_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,
        #[command(flatten)]
        connect: ConnectArgs,
    },
}

#[derive(Args, Clone, Debug)]
pub struct ConnectArgs {
    /// How the login page is presented
    #[arg(long, value_enum, default_value_t = ModeArg::Popup)]
    pub mode: ModeArg,

    /// Fixed listener port (OS-assigned when omitted)
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to wait for the token
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Write the launch HTML here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub html_out: Option<PathBuf>,

    /// Open the login page in a browser and paste the redirect URL back
    #[arg(long)]
    pub manual: bool,

    /// Accept relay messages from any origin
    #[arg(long)]
    pub allow_any_origin: bool,
}

impl ConnectArgs {
    pub fn origin_policy(&self) -> OriginPolicy {
        if self.allow_any_origin {
            OriginPolicy::Any
        } else {
            OriginPolicy::Strict
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Popup,
    Iframe,
    Link,
}

impl From<ModeArg> for LaunchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Popup => LaunchMode::Popup,
            ModeArg::Iframe => LaunchMode::Iframe,
            ModeArg::Link => LaunchMode::Link,
        }
    }
}
