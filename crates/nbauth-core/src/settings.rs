//! Process configuration needed before any flow may start.
//!
//! Settings can be built explicitly, read from a TOML file, or taken from the
//! environment variables the notebook deployment exports. Nothing is filled in
//! silently: [`Settings::validate`] rejects empty required fields so a flow
//! never starts against placeholder endpoints.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{AuthError, Result};

pub const DEFAULT_SCOPE: &str = "openid profile email";

/// Path of the Callback Page under the proxy's stable base URL.
pub const CALLBACK_PATH: &str = "/jupyter_oauth2/callback";

const USER_REDIRECT_SUFFIX: &str = "/user-redirect";

const ENV_JUPYTER_URL: &str = "JUPYTER_URL";
const ENV_JUPYTERHUB_URL: &str = "JUPYTERHUB_URL";
const ENV_API_AUDIENCE: &str = "JUPYTER_OAUTH2_API_AUDIENCE";
const ENV_CLIENT_ID: &str = "JUPYTER_OAUTH2_CLIENT_ID";
const ENV_SCOPE: &str = "JUPYTER_OAUTH2_SCOPE";
const ENV_AUTH_URL: &str = "JUPYTER_OAUTH2_AUTH_PROVIDER_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Externally routed base URL of the notebook proxy front end,
    /// e.g. `https://hub.example.org/user-redirect`.
    #[serde(default)]
    pub base_url: String,

    /// API audience requested in the authorization and used as the
    /// prefix for relative API paths.
    #[serde(default)]
    pub api_audience: String,

    /// OAuth2 client id registered with the identity provider.
    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_scope")]
    pub scope: String,

    /// Identity provider base URL; `/authorize` and `/userinfo` hang off it.
    #[serde(default)]
    pub auth_url: String,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_audience: String::new(),
            client_id: String::new(),
            scope: default_scope(),
            auth_url: String::new(),
        }
    }
}

/// Which window origins the browser-side relay will talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginPolicy {
    /// Only the origin of [`Settings::base_url`].
    #[default]
    Strict,
    /// Any origin. Matches the behavior of permissive deployments.
    Any,
}

/// How the listener treats deliveries submitted with `verify=false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReusePolicy {
    /// Accept only if the payload's own `id_token.exp` is still in the future.
    #[default]
    RequireUnexpired,
    /// Accept whatever the client hands back.
    TrustClient,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup, using the same keys as
    /// [`Settings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = non_empty(ENV_JUPYTER_URL)
            .or_else(|| non_empty(ENV_JUPYTERHUB_URL))
            .map(|url| format!("{}{USER_REDIRECT_SUFFIX}", url.trim_end_matches('/')))
            .unwrap_or_default();

        Self {
            base_url,
            api_audience: non_empty(ENV_API_AUDIENCE).unwrap_or_default(),
            client_id: non_empty(ENV_CLIENT_ID).unwrap_or_default(),
            scope: non_empty(ENV_SCOPE).unwrap_or_else(default_scope),
            auth_url: non_empty(ENV_AUTH_URL).unwrap_or_default(),
        }
    }

    /// Default location of the settings file.
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            AuthError::InvalidConfiguration("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("nbauth").join("settings.toml"))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            AuthError::InvalidConfiguration(format!(
                "Failed to parse settings file {}: {e}",
                path.display()
            ))
        })
    }

    /// Resolve settings from an explicit file, else the default settings file
    /// if one exists, else the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_file(path);
        }

        if let Ok(default_path) = Self::config_path() {
            if default_path.exists() {
                tracing::debug!(path = %default_path.display(), "Loading settings file");
                return Self::load_file(&default_path);
            }
        }

        Ok(Self::from_env())
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("base_url", &self.base_url),
            ("api_audience", &self.api_audience),
            ("client_id", &self.client_id),
            ("scope", &self.scope),
            ("auth_url", &self.auth_url),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AuthError::ConfigurationMissing { field });
            }
        }

        for (field, value) in [("base_url", &self.base_url), ("auth_url", &self.auth_url)] {
            Url::parse(value).map_err(|e| {
                AuthError::InvalidConfiguration(format!("{field} is not a valid URL: {e}"))
            })?;
        }

        Ok(())
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Fixed redirect URI registered with the identity provider.
    pub fn callback_url(&self) -> String {
        format!("{}{CALLBACK_PATH}", self.base())
    }

    /// Proxied URL of a listener's token intake endpoint.
    pub fn relay_endpoint(&self, port: u16) -> String {
        format!("{}/proxy/{port}/token", self.base())
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.auth_url.trim_end_matches('/'))
    }

    pub fn userinfo_endpoint(&self) -> String {
        format!("{}/userinfo", self.auth_url.trim_end_matches('/'))
    }

    /// Origin (`scheme://host[:port]`) of the proxy front end.
    pub fn proxy_origin(&self) -> Result<String> {
        let url = Url::parse(&self.base_url)?;
        Ok(url.origin().ascii_serialization())
    }
}
