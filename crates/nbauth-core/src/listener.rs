use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, Result};
use crate::session::{IntakeOutcome, SharedSession};
use crate::token::TokenPayload;

pub const HEALTH_PATH: &str = "/";
pub const TOKEN_PATH: &str = "/token";
/// Alias of `GET /token?verify=false`.
pub const REUSE_PATH: &str = "/reusetoken";

const STOP_GRACE: Duration = Duration::from_secs(2);

/// Address a listener binds to when the caller does not pin a port.
pub fn bind_addr(port: Option<u16>) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port.unwrap_or(0)))
}

/// Handle for a running per-flow token listener.
#[derive(Debug)]
pub struct TokenListener {
    addr: SocketAddr,
    session: SharedSession,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TokenListener {
    /// Bind and start serving. The assigned port is known (and recorded in
    /// the session) once this returns.
    pub async fn spawn(session: SharedSession, bind_addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| AuthError::Listener(format!("Failed to bind {bind_addr}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| AuthError::Listener(format!("Failed to read bound address: {e}")))?;

        session.lock().await.set_listener_port(addr.port());

        let router = Router::new()
            .route(HEALTH_PATH, get(health))
            .route(TOKEN_PATH, get(token_via_query).post(token_via_body))
            .route(REUSE_PATH, get(reuse_via_query))
            .fallback(not_found)
            .with_state(session.clone());

        let shutdown = CancellationToken::new();
        let ct = shutdown.clone();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            ct.cancelled().await;
        });

        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "Token listener shut down with error");
            }
        });

        info!(port = addr.port(), "Token listener running");

        Ok(Self {
            addr,
            session,
            shutdown,
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting connections and release the port. Safe to call twice.
    pub async fn stop(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        self.shutdown.cancel();
        if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
            warn!(port = self.port(), "Token listener did not drain in time, aborting");
            task.abort();
            let _ = task.await;
        }
        info!(port = self.port(), "Token listener stopped");
    }
}

impl Drop for TokenListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    data: Option<String>,
    verify: Option<String>,
}

async fn health() -> &'static str {
    "OK"
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

async fn token_via_query(
    State(session): State<SharedSession>,
    Query(query): Query<TokenQuery>,
) -> Response {
    debug!("Token received via GET");
    let verify = match parse_verify(query.verify.as_deref()) {
        Ok(verify) => verify,
        Err(response) => return response,
    };
    intake(&session, decode_query_payload(query.data.as_deref()), verify).await
}

async fn reuse_via_query(
    State(session): State<SharedSession>,
    Query(query): Query<TokenQuery>,
) -> Response {
    debug!("Token received via GET (reuse)");
    intake(&session, decode_query_payload(query.data.as_deref()), false).await
}

async fn token_via_body(
    State(session): State<SharedSession>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    debug!("Token received via POST");
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_none_or(|ct| ct.starts_with("application/json") || ct.starts_with("text/plain"));
    if !is_json {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected a JSON token payload",
        )
            .into_response();
    }

    let verify = match parse_verify(query.verify.as_deref()) {
        Ok(verify) => verify,
        Err(response) => return response,
    };
    intake(&session, TokenPayload::from_json(&body), verify).await
}

fn decode_query_payload(data: Option<&str>) -> Result<TokenPayload> {
    let data = data.ok_or_else(|| AuthError::InvalidPayload("Missing data parameter".to_string()))?;
    TokenPayload::from_data_param(data)
}

fn parse_verify(raw: Option<&str>) -> std::result::Result<bool, Response> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        None | Some("" | "true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => {
            Err((StatusCode::BAD_REQUEST, format!("Invalid verify flag: {other}")).into_response())
        }
    }
}

async fn intake(session: &SharedSession, payload: Result<TokenPayload>, verify: bool) -> Response {
    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Rejecting malformed token delivery: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let outcome = session.lock().await.submit(payload, verify);
    match outcome {
        IntakeOutcome::Accepted(_) => (StatusCode::OK, "Token processed").into_response(),
        IntakeOutcome::Duplicate => (StatusCode::OK, "Token already received").into_response(),
        IntakeOutcome::Rejected(e @ (AuthError::NonceMismatch | AuthError::StaleToken)) => {
            (StatusCode::FORBIDDEN, e.to_string()).into_response()
        }
        IntakeOutcome::Rejected(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::Nonce;
    use crate::session::{FlowSession, FlowStatus};
    use crate::settings::ReusePolicy;
    use serde_json::json;

    async fn start(nonce: &str) -> TokenListener {
        let session = FlowSession::shared(Nonce::from(nonce), ReusePolicy::default());
        TokenListener::spawn(session, SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap()
    }

    fn url(listener: &TokenListener, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", listener.port())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let mut listener = start("n").await;
        let resp = reqwest::get(url(&listener, "/")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "OK");
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_port_is_recorded_in_session() {
        let mut listener = start("n").await;
        assert_ne!(listener.port(), 0);
        assert_eq!(
            listener.session().lock().await.listener_port(),
            Some(listener.port())
        );
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_post_token() {
        let mut listener = start("n1").await;
        let resp = reqwest::Client::new()
            .post(url(&listener, TOKEN_PATH))
            .json(&json!({
                "access_token": "abc",
                "id_token": {"nonce": "n1", "exp": 9_999_999_999i64},
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(
            listener.session().lock().await.status(),
            FlowStatus::TokenReceived
        );
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_rejections_map_to_status_codes() {
        let mut listener = start("n1").await;
        let client = reqwest::Client::new();

        let missing = client.get(url(&listener, TOKEN_PATH)).send().await.unwrap();
        assert_eq!(missing.status(), 400);

        let garbage = client
            .get(url(&listener, "/token?data=%25%25"))
            .send()
            .await
            .unwrap();
        assert_eq!(garbage.status(), 400);

        let bad_flag = client
            .get(url(&listener, "/token?data=e30&verify=maybe"))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_flag.status(), 400);

        let wrong_method = client
            .post(url(&listener, REUSE_PATH))
            .send()
            .await
            .unwrap();
        assert_eq!(wrong_method.status(), 405);

        let unknown = client.get(url(&listener, "/nope")).send().await.unwrap();
        assert_eq!(unknown.status(), 404);

        let session = listener.session().lock().await;
        assert_eq!(session.status(), FlowStatus::Pending);
        assert!(session.token().is_none());
        drop(session);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let mut listener = start("n").await;
        let port = listener.port();
        assert!(listener.is_running());

        listener.stop().await;
        listener.stop().await;

        assert!(!listener.is_running());
        assert!(
            tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_bind_addr() {
        assert_eq!(bind_addr(None).to_string(), "0.0.0.0:0");
        assert_eq!(bind_addr(Some(8123)).port(), 8123);
    }
}
