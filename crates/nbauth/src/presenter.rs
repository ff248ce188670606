use async_trait::async_trait;
use nbauth_core::{AuthError, Launch, Presenter};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// Emits the launch HTML for a notebook front end to display.
pub struct HtmlPresenter {
    out: Option<PathBuf>,
}

impl HtmlPresenter {
    pub fn new(out: Option<PathBuf>) -> Self {
        Self { out }
    }
}

#[async_trait]
impl Presenter for HtmlPresenter {
    async fn present(&self, launch: &Launch) -> nbauth_core::Result<()> {
        let html = launch.html();
        match &self.out {
            Some(path) => {
                std::fs::write(path, html)?;
                info!(path = %path.display(), "Wrote launch HTML");
            }
            None => {
                let mut stdout = std::io::stdout();
                writeln!(stdout, "{html}")?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}

/// Opens the authorization URL in the system browser, for terminals where no
/// notebook front end can run the relay script.
pub struct BrowserPresenter;

#[async_trait]
impl Presenter for BrowserPresenter {
    async fn present(&self, launch: &Launch) -> nbauth_core::Result<()> {
        let url = launch.authorization_url.as_str();
        let mut stdout = std::io::stdout();
        writeln!(stdout, "Opening browser to sign in...")?;
        writeln!(stdout, "If the browser doesn't open automatically, please visit:")?;
        writeln!(stdout, "{url}")?;
        writeln!(stdout)?;

        if let Err(e) = open::that(url) {
            warn!("Failed to open browser: {}", e);
            return Ok(());
        }
        info!(port = launch.port, "Opened authorization URL in browser");
        Ok(())
    }
}

/// Read back a redirect URL pasted on stdin.
pub async fn read_pasted_redirect() -> nbauth_core::Result<String> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut stdout = std::io::stdout();
    writeln!(
        stdout,
        "After signing in, copy the ENTIRE address of the page you land on and paste it here:"
    )?;
    write!(stdout, "Redirect URL: ")?;
    stdout.flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    let line = line.trim();
    if line.is_empty() {
        return Err(AuthError::InvalidPayload("No redirect URL entered".to_string()));
    }
    Ok(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbauth_core::{LaunchMode, Launcher, Nonce, OriginPolicy, Settings};

    fn launch() -> Launch {
        let settings = Settings {
            base_url: "https://hub.example.org/user-redirect".to_string(),
            api_audience: "https://api.example.org/api".to_string(),
            client_id: "client".to_string(),
            scope: "openid".to_string(),
            auth_url: "https://login.example.org".to_string(),
        };
        Launcher::new(settings, OriginPolicy::Strict)
            .prepare(&Nonce::from("n"), 4242, LaunchMode::Link)
            .unwrap()
    }

    #[tokio::test]
    async fn test_html_presenter_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("launch.html");
        let launch = launch();

        HtmlPresenter::new(Some(path.clone()))
            .present(&launch)
            .await
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, launch.html());
        assert!(written.contains("/proxy/4242/token"));
    }

    #[tokio::test]
    async fn test_html_presenter_reports_io_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing").join("launch.html");

        let err = HtmlPresenter::new(Some(path))
            .present(&launch())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Io(_)));
    }
}
