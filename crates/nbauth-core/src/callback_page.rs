//! The fixed-URL page the identity provider redirects to.
//!
//! The page itself runs in the browser: it reads the redirect parameters,
//! decodes the `id_token`, classifies the outcome and posts the result to the
//! window that opened or embedded it. [`RelayMessage`] applies the same rules
//! on the Rust side so a pasted redirect URL is handled identically.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AuthError, Result};
use crate::html::script_literal;
use crate::token::{TokenPayload, decode_jwt_claims};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Ok,
    Error,
}

/// Message relayed from the Callback Page to its opener or parent window:
/// `{statusAuth, ...parsed redirect fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "statusAuth")]
    pub status: AuthStatus,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RelayMessage {
    /// Build the message from a full redirect URL, or from a bare fragment or
    /// query string. The fragment wins when both are present.
    pub fn from_redirect(input: &str) -> Self {
        let mut fields = parse_redirect_params(input);

        if let Some(Value::String(raw)) = fields.get("id_token") {
            match decode_jwt_claims(raw).and_then(|claims| {
                serde_json::to_value(claims)
                    .map_err(|e| AuthError::InvalidPayload(format!("Invalid claims: {e}")))
            }) {
                Ok(claims) => {
                    fields.insert("id_token".to_string(), claims);
                }
                Err(e) => tracing::warn!("Leaving undecodable id_token in place: {}", e),
            }
        }

        let status = if contains_error(&fields) {
            AuthStatus::Error
        } else {
            AuthStatus::Ok
        };

        Self { status, fields }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AuthStatus::Ok
    }

    fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// The provider-reported failure, if the redirect was classified as one.
    pub fn provider_error(&self) -> Option<AuthError> {
        if self.is_ok() {
            return None;
        }

        let error = self.field_str("error").map_or_else(
            || {
                if self.fields.contains_key(STATE_FIELD) {
                    "missing_token".to_string()
                } else {
                    "missing_state".to_string()
                }
            },
            str::to_string,
        );

        Some(AuthError::ProviderError {
            error,
            description: self.field_str("error_description").map(str::to_string),
        })
    }

    /// Turn a successful message into the payload the listener accepts.
    pub fn into_token_payload(self) -> Result<TokenPayload> {
        if let Some(err) = self.provider_error() {
            return Err(err);
        }
        let value = serde_json::to_value(&self)
            .map_err(|e| AuthError::InvalidPayload(format!("Invalid relay message: {e}")))?;
        TokenPayload::from_value(value)
    }
}

/// Flatten the redirect's fragment (preferred) or query into name/value pairs.
/// Later duplicates win.
pub fn parse_redirect_params(input: &str) -> Map<String, Value> {
    let input = input.trim();

    let fragment = input.split_once('#').map(|(_, f)| f).filter(|f| !f.is_empty());
    let query = input
        .split_once('?')
        .map(|(_, q)| q.split('#').next().unwrap_or_default())
        .filter(|q| !q.is_empty());

    let params = match (fragment, query) {
        (Some(fragment), _) => fragment,
        (None, Some(query)) => query,
        // A bare `a=1&b=2` string with no URL around it.
        (None, None) if !input.contains("://") => input,
        (None, None) => "",
    };

    url::form_urlencoded::parse(params.as_bytes())
        .into_owned()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

/// Any of these marks the redirect as a failure.
const ERROR_FIELDS: [&str; 2] = ["error", "error_description"];
/// A successful redirect carries at least one of these.
const GRANT_FIELDS: [&str; 2] = ["access_token", "code"];
const STATE_FIELD: &str = "state";

/// Classification rules as the page script reads them.
fn rules() -> Value {
    json!({
        "errorFields": ERROR_FIELDS,
        "grantFields": GRANT_FIELDS,
        "stateField": STATE_FIELD,
    })
}

fn contains_error(fields: &Map<String, Value>) -> bool {
    ERROR_FIELDS.iter().any(|key| fields.contains_key(*key))
        || !GRANT_FIELDS.iter().any(|key| fields.contains_key(*key))
        || !fields.contains_key(STATE_FIELD)
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8" />
    <title>Authorization Callback</title>
    <style>
        body { font-family: Arial, sans-serif; text-align: center; padding: 50px; }
        .success { color: #4caf50; }
        .error { color: #d32f2f; }
        pre { text-align: left; white-space: pre-wrap; word-break: break-all; }
    </style>
</head>
<body>
    <h1 id="title">Completing sign-in&hellip;</h1>
    <p id="msg"></p>
    <pre id="detail"></pre>
    <script type="text/javascript">
"#;

const PAGE_SCRIPT: &str = r#"
(function () {
    function readParams() {
        var href = window.location.href;
        var hashAt = href.indexOf('#');
        var hash = hashAt >= 0 ? href.slice(hashAt + 1) : '';
        var query = window.location.search ? window.location.search.slice(1) : '';
        var params = new URLSearchParams(hash || query);
        var data = {};
        params.forEach(function (value, key) { data[key] = value; });
        return data;
    }

    function decodeJwt(token) {
        var segment = token.split('.')[1];
        if (!segment) { throw new Error('malformed id_token'); }
        var b64 = segment.replace(/-/g, '+').replace(/_/g, '/');
        while (b64.length % 4) { b64 += '='; }
        var bytes = window.atob(b64);
        var escaped = Array.prototype.map.call(bytes, function (c) {
            return '%' + ('00' + c.charCodeAt(0).toString(16)).slice(-2);
        }).join('');
        return JSON.parse(decodeURIComponent(escaped));
    }

    function containsError(data) {
        function has(key) { return Object.prototype.hasOwnProperty.call(data, key); }
        return RULES.errorFields.some(has)
            || !RULES.grantFields.some(has)
            || !has(RULES.stateField);
    }

    function show(title, cls, message, detail) {
        var t = document.getElementById('title');
        t.textContent = title;
        t.className = cls;
        document.getElementById('msg').textContent = message;
        if (detail) { document.getElementById('detail').textContent = detail; }
    }

    function deliver(message) {
        var target = null;
        if (window.opener && window.opener !== window) {
            target = window.opener;
        } else if (window.parent && window.parent !== window) {
            target = window.parent;
        }
        if (!target) { return false; }
        try {
            target.postMessage(message, TARGET_ORIGIN);
            return true;
        } catch (e) {
            console.warn('Failed to relay authorization result', e);
            return false;
        }
    }

    var data = readParams();
    if (typeof data.id_token === 'string') {
        try {
            data.id_token = decodeJwt(data.id_token);
        } catch (e) {
            console.warn('Could not decode id_token', e);
        }
    }

    var failed = containsError(data);
    var message = Object.assign({ statusAuth: failed ? 'error' : 'ok' }, data);

    if (failed) {
        show('Authorization Failed', 'error',
            data.error_description || data.error || 'The identity provider did not return a token.',
            JSON.stringify(data, null, 2));
    } else {
        show('Authorization Successful', 'success', 'Returning to your notebook.');
    }

    var delivered = deliver(message);
    if (!delivered) {
        document.getElementById('msg').textContent +=
            ' No opener window found; copy this page\'s URL into the waiting session.';
        return;
    }

    try { window.close(); } catch (e) { /* best effort */ }
})();
    </script>
</body>
</html>
"#;

/// Render the Callback Page. `target_origin` restricts which origin the
/// result may be posted to; `None` posts to any origin.
pub fn render(target_origin: Option<&str>) -> Result<String> {
    let origin = script_literal(&target_origin.unwrap_or("*"))?;
    let rule_table = script_literal(&rules())?;
    Ok(format!(
        "{PAGE_HEAD}        var TARGET_ORIGIN = {origin};\n        \
         var RULES = {rule_table};{PAGE_SCRIPT}"
    ))
}
