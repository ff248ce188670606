use dotenvy::dotenv;
use eyre::{Result, eyre};
use nbauth_core::Settings;
use std::path::Path;

pub fn load_env() -> Result<()> {
    dotenv().ok();
    Ok(())
}

/// Settings from `path`, the default settings file, or the environment.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings =
        Settings::load(path).map_err(|e| eyre!("Failed to load settings: {}", e))?;
    settings
        .validate()
        .map_err(|e| eyre!("{}. Set the JUPYTER_* variables or pass --config.", e))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_settings_rejects_incomplete_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "client_id = \"abc\"\n").unwrap();

        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_load_settings_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
base_url = "https://hub.example.org/user-redirect"
api_audience = "https://api.example.org/api"
client_id = "client-123"
auth_url = "https://login.example.org"
"#,
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.client_id, "client-123");
        assert_eq!(settings.scope, "openid profile email");
    }
}
