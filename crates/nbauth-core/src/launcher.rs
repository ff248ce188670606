//! Builds the authorization request and the browser-side glue that opens it.
//!
//! The output is HTML meant for the calling window (the notebook page): a
//! relay script that forwards the Callback Page's message to the session's
//! token listener, and a presentation block that opens the provider login as
//! a popup, an inline frame, or a plain link.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{AuthError, Result};
use crate::html::{escape_attr, script_literal};
use crate::nonce::Nonce;
use crate::settings::{OriginPolicy, Settings};

const RESPONSE_TYPE: &str = "token id_token";
const STATE_PREFIX: &str = "nbauth,";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Open the login page in a new browsing context.
    #[default]
    Popup,
    /// Embed the login page in an invisible inline frame.
    Iframe,
    /// Render a link and let the user open it.
    Link,
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMode::Popup => write!(f, "popup"),
            LaunchMode::Iframe => write!(f, "iframe"),
            LaunchMode::Link => write!(f, "link"),
        }
    }
}

impl FromStr for LaunchMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "popup" => Ok(LaunchMode::Popup),
            "iframe" => Ok(LaunchMode::Iframe),
            "link" => Ok(LaunchMode::Link),
            other => Err(AuthError::InvalidConfiguration(format!(
                "Unknown launch mode '{other}', expected popup, iframe or link"
            ))),
        }
    }
}

/// `state` value sent with the authorization request.
pub fn state_for(nonce: &Nonce) -> String {
    format!("{STATE_PREFIX}{nonce}")
}

/// Recover the nonce embedded in a `state` value.
pub fn nonce_from_state(state: &str) -> Option<&str> {
    state.strip_prefix(STATE_PREFIX).filter(|n| !n.is_empty())
}

pub fn authorization_url(settings: &Settings, nonce: &Nonce) -> Result<Url> {
    let redirect_uri = settings.callback_url();
    let state = state_for(nonce);
    let params = [
        ("response_type", RESPONSE_TYPE),
        ("redirect_uri", redirect_uri.as_str()),
        ("client_id", settings.client_id.as_str()),
        ("audience", settings.api_audience.as_str()),
        ("scope", settings.scope.as_str()),
        ("nonce", nonce.as_str()),
        ("state", state.as_str()),
    ];

    let query = serde_urlencoded::to_string(params)
        .map_err(|e| AuthError::InvalidConfiguration(format!("Failed to encode auth URL: {e}")))?;
    Ok(Url::parse(&format!("{}?{query}", settings.authorize_endpoint()))?)
}

/// Everything the calling window needs to run one flow.
#[derive(Debug, Clone)]
pub struct Launch {
    pub mode: LaunchMode,
    pub port: u16,
    pub nonce: Nonce,
    pub authorization_url: Url,
    pub relay_endpoint: String,
    pub relay_script: String,
    pub presentation: String,
}

impl Launch {
    /// Relay script followed by the presentation block.
    pub fn html(&self) -> String {
        format!("{}\n{}", self.relay_script, self.presentation)
    }
}

#[derive(Debug, Clone)]
pub struct Launcher {
    settings: Settings,
    origin_policy: OriginPolicy,
}

impl Launcher {
    pub fn new(settings: Settings, origin_policy: OriginPolicy) -> Self {
        Self {
            settings,
            origin_policy,
        }
    }

    pub fn prepare(&self, nonce: &Nonce, port: u16, mode: LaunchMode) -> Result<Launch> {
        let authorization_url = authorization_url(&self.settings, nonce)?;
        let relay_endpoint = self.settings.relay_endpoint(port);
        let allowed_origin = match self.origin_policy {
            OriginPolicy::Strict => Some(self.settings.proxy_origin()?),
            OriginPolicy::Any => None,
        };

        let relay_script = relay_script(&relay_endpoint, allowed_origin.as_deref(), port)?;
        let presentation = presentation(mode, &authorization_url)?;

        tracing::debug!(%mode, port, "Prepared authorization launch");

        Ok(Launch {
            mode,
            port,
            nonce: nonce.clone(),
            authorization_url,
            relay_endpoint,
            relay_script,
            presentation,
        })
    }
}

const RELAY_BODY: &str = r#"
    function encode(data) {
        var json = JSON.stringify(data);
        var b64 = window.btoa(unescape(encodeURIComponent(json)));
        return b64.replace(/\+/g, '-').replace(/\//g, '_').replace(/=+$/, '');
    }

    function relay(data, reuse) {
        var uri = CONFIG.endpoint + '?data=' + encode(data)
            + '&verify=' + (reuse ? 'false' : 'true');
        var xhr = new XMLHttpRequest();
        xhr.open('GET', uri);
        xhr.onload = function () { console.log('Token relayed (' + xhr.status + ')'); };
        xhr.send();
    }

    function status(text) {
        var el = document.getElementById(CONFIG.statusId);
        if (el) { el.textContent = text; }
    }

    function onMessage(event) {
        if (CONFIG.allowedOrigin && event.origin !== CONFIG.allowedOrigin) { return; }
        var data = event.data;
        if (!data || typeof data !== 'object') { return; }
        if (data.statusAuth === 'error') {
            var reason = data.error_description || data.error || 'no token returned';
            status('Authorization failed: ' + reason);
            return;
        }
        if (!('access_token' in data)) { return; }

        window.removeEventListener('message', onMessage);
        if (window.nbauthListener === onMessage) { window.nbauthListener = null; }
        if (data.id_token && data.id_token.exp) { window.nbauthToken = data; }
        status('Authorization received.');
        relay(data, false);
    }

    // Only one flow listens at a time; a newer launch supersedes older ones.
    if (window.nbauthListener) {
        window.removeEventListener('message', window.nbauthListener);
    }
    window.nbauthListener = onMessage;
    window.addEventListener('message', onMessage);

    window.nbauthReuseCached = function () {
        var cached = window.nbauthToken;
        if (!cached || !cached.id_token || !(cached.id_token.exp * 1000 > Date.now())) {
            return false;
        }
        window.removeEventListener('message', onMessage);
        if (window.nbauthListener === onMessage) { window.nbauthListener = null; }
        status('Reusing the current sign-in.');
        relay(cached, true);
        return true;
    };
})();
</script>"#;

fn status_id(port: u16) -> String {
    format!("nbauth-status-{port}")
}

fn relay_script(endpoint: &str, allowed_origin: Option<&str>, port: u16) -> Result<String> {
    let config = script_literal(&json!({
        "endpoint": endpoint,
        "allowedOrigin": allowed_origin,
        "statusId": status_id(port),
    }))?;
    Ok(format!(
        "<div id=\"{}\" class=\"nbauth-status\"></div>\n\
         <script>\n(function () {{\n    var CONFIG = {config};{RELAY_BODY}",
        status_id(port)
    ))
}

fn presentation(mode: LaunchMode, url: &Url) -> Result<String> {
    let url_literal = script_literal(&url.as_str())?;
    let html = match mode {
        LaunchMode::Popup => format!(
            r#"<script>
(function () {{
    if (window.nbauthReuseCached && window.nbauthReuseCached()) {{ return; }}
    window.open({url_literal});
}})();
</script>"#
        ),
        LaunchMode::Iframe => format!(
            r#"<script>
(function () {{
    if (window.nbauthReuseCached && window.nbauthReuseCached()) {{ return; }}
    var frame = document.createElement('iframe');
    frame.src = {url_literal};
    frame.width = 0;
    frame.height = 0;
    frame.style.border = 'none';
    document.body.appendChild(frame);
}})();
</script>"#
        ),
        LaunchMode::Link => format!(
            r#"<h3><a href="{}" target="_blank" rel="opener">Click here to sign in</a></h3>
<script>
(function () {{
    if (window.nbauthReuseCached) {{ window.nbauthReuseCached(); }}
}})();
</script>"#,
            escape_attr(url.as_str())
        ),
    };
    Ok(html)
}
