use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use nbauth_core::{
    AccessToken, AuthError, ConnectOptions, FlowCoordinator, FlowState, Launch, Presenter,
    Settings, Verification,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

struct RecordingPresenter {
    launches: mpsc::UnboundedSender<Launch>,
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn present(&self, launch: &Launch) -> nbauth_core::Result<()> {
        let _ = self.launches.send(launch.clone());
        Ok(())
    }
}

fn recording() -> (Arc<RecordingPresenter>, mpsc::UnboundedReceiver<Launch>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingPresenter { launches: tx }), rx)
}

fn settings() -> Settings {
    Settings {
        base_url: "http://localhost:8888/user-redirect".to_string(),
        api_audience: "https://api.example.org/api".to_string(),
        client_id: "dummy-client".to_string(),
        scope: "openid profile email".to_string(),
        auth_url: "https://login.example.org".to_string(),
    }
}

fn options(timeout: Duration) -> ConnectOptions {
    ConnectOptions {
        timeout,
        poll_interval: Duration::from_millis(50),
        ..ConnectOptions::default()
    }
}

fn payload(token: &str, nonce: &str) -> Value {
    json!({
        "access_token": token,
        "id_token": {"nonce": nonce, "exp": 9_999_999_999i64},
        "statusAuth": "ok",
    })
}

fn data_param(payload: &Value) -> String {
    URL_SAFE_NO_PAD.encode(payload.to_string())
}

fn make_jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"RS256\",\"typ\":\"JWT\"}");
    let claims = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{claims}.signature")
}

async fn relay_get(port: u16, path: &str, payload: &Value, verify: bool) -> reqwest::Response {
    let url = format!(
        "http://127.0.0.1:{port}{path}?data={}&verify={verify}",
        data_param(payload)
    );
    reqwest::get(url).await.expect("relay request")
}

async fn port_closed(port: u16) -> bool {
    TcpStream::connect(("127.0.0.1", port)).await.is_err()
}

#[tokio::test]
async fn test_end_to_end_get_relay() {
    let (presenter, mut launches) = recording();
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::from_secs(10)), presenter);

    let browser = tokio::spawn(async move {
        let launch = launches.recv().await.expect("launch presented");
        let resp = relay_get(
            launch.port,
            "/token",
            &payload("abc", launch.nonce.as_str()),
            true,
        )
        .await;
        (launch, resp.status().as_u16())
    });

    let token = coordinator.connect().await.expect("connect");
    let (launch, status) = browser.await.expect("browser task");

    assert_eq!(token.bearer, "abc");
    assert!(token.is_valid());
    assert_eq!(status, 200);
    assert_eq!(coordinator.verification(), Some(Verification::Nonce));
    assert_eq!(coordinator.state(), FlowState::Completed);
    assert!(coordinator.port().is_none());
    assert!(port_closed(launch.port).await);

    let query: std::collections::HashMap<String, String> =
        launch.authorization_url.query_pairs().into_owned().collect();
    assert_eq!(query["nonce"], launch.nonce.as_str());
    assert_eq!(
        query["redirect_uri"],
        "http://localhost:8888/user-redirect/jupyter_oauth2/callback"
    );
}

#[tokio::test]
async fn test_wrong_nonce_times_out() {
    let (presenter, mut launches) = recording();
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::from_secs(1)), presenter);

    let browser = tokio::spawn(async move {
        let launch = launches.recv().await.expect("launch presented");
        let resp = relay_get(launch.port, "/token", &payload("abc", "wrong"), true).await;
        resp.status().as_u16()
    });

    let err = coordinator.connect().await.expect_err("should time out");
    assert!(matches!(err, AuthError::Timeout { .. }));
    assert!(err.is_recoverable());
    assert_eq!(browser.await.expect("browser task"), 403);
    assert_eq!(coordinator.state(), FlowState::TimedOut);
    assert!(coordinator.token().is_none());

    coordinator.stop().await;
}

#[tokio::test]
async fn test_timeout_keeps_listener_for_late_delivery() {
    let (presenter, mut launches) = recording();
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::from_millis(300)), presenter);

    let err = coordinator.connect().await.expect_err("should time out");
    assert!(matches!(err, AuthError::Timeout { .. }));

    let launch = launches.recv().await.expect("launch presented");
    assert_eq!(coordinator.port(), Some(launch.port));
    assert!(coordinator.is_listening());

    let health = reqwest::get(format!("http://127.0.0.1:{}/", launch.port))
        .await
        .expect("health request");
    assert_eq!(health.status(), 200);

    assert!(coordinator.check().await.is_none());

    let resp = relay_get(
        launch.port,
        "/token",
        &payload("late", launch.nonce.as_str()),
        true,
    )
    .await;
    assert_eq!(resp.status(), 200);

    let token = coordinator.check().await.expect("late token");
    assert_eq!(token.bearer, "late");
    assert_eq!(coordinator.state(), FlowState::Completed);
    assert!(port_closed(launch.port).await);
}

#[tokio::test]
async fn test_expired_cached_token_starts_exactly_one_flow() {
    let (presenter, mut launches) = recording();
    let expired = AccessToken::new("old", Some(SystemTime::now() - Duration::from_secs(60)));
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::from_secs(10)), presenter)
            .with_cached_token(expired);

    let browser = tokio::spawn(async move {
        let launch = launches.recv().await.expect("launch presented");
        relay_get(
            launch.port,
            "/token",
            &payload("fresh", launch.nonce.as_str()),
            true,
        )
        .await;
        // Nothing else should be presented for this connect.
        launches.try_recv().is_err()
    });

    let token = coordinator.connect().await.expect("connect");
    assert_eq!(token.bearer, "fresh");
    assert!(browser.await.expect("browser task"));

    // The fresh token is cached now and short-circuits the next connect.
    let again = coordinator.connect().await.expect("reuse");
    assert_eq!(again.bearer, "fresh");
    assert!(coordinator.port().is_none());
}

#[tokio::test]
async fn test_duplicate_deliveries_keep_first_token() {
    let (presenter, _launches) = recording();
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::from_secs(10)), presenter);
    let launch = coordinator.start().await.expect("start");
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/token", launch.port);

    let first = client
        .post(&url)
        .json(&payload("first", launch.nonce.as_str()))
        .send()
        .await
        .expect("first delivery");
    assert_eq!(first.status(), 200);

    let second = client
        .post(&url)
        .json(&payload("second", launch.nonce.as_str()))
        .send()
        .await
        .expect("second delivery");
    assert_eq!(second.status(), 200);
    assert_eq!(second.text().await.expect("body"), "Token already received");

    let token = coordinator.check().await.expect("token");
    assert_eq!(token.bearer, "first");
}

#[tokio::test]
async fn test_reuse_endpoint_checks_expiry() {
    let (presenter, _launches) = recording();
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::from_secs(10)), presenter);
    let launch = coordinator.start().await.expect("start");

    let stale = json!({
        "access_token": "stale",
        "id_token": {"nonce": "from-an-older-flow", "exp": 1},
    });
    let resp = relay_get(launch.port, "/reusetoken", &stale, false).await;
    assert_eq!(resp.status(), 403);
    assert!(coordinator.check().await.is_none());

    let cached = payload("cached", "from-an-older-flow");
    let resp = relay_get(launch.port, "/token", &cached, false).await;
    assert_eq!(resp.status(), 200);

    let token = coordinator.check().await.expect("reused token");
    assert_eq!(token.bearer, "cached");
    assert_eq!(coordinator.verification(), Some(Verification::Reused));
}

#[tokio::test]
async fn test_unverified_delivery_is_reported_as_reused() {
    let (presenter, mut launches) = recording();
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::from_secs(10)), presenter);

    let browser = tokio::spawn(async move {
        let launch = launches.recv().await.expect("launch presented");
        // A token cached by the page from an earlier flow carries a stale nonce.
        let cached = payload("from-cache", "nonce-of-an-older-flow");
        relay_get(launch.port, "/reusetoken", &cached, false)
            .await
            .status()
            .as_u16()
    });

    let token = coordinator.connect().await.expect("connect");
    assert_eq!(browser.await.expect("browser task"), 200);
    assert_eq!(token.bearer, "from-cache");
    assert_eq!(coordinator.verification(), Some(Verification::Reused));

    let received = coordinator.received().expect("delivery recorded");
    assert_eq!(received.verification, Verification::Reused);
    assert_eq!(received.access_token(), token);

    // A seeded token has no delivery behind it.
    let seeded = FlowCoordinator::new(
        settings(),
        options(Duration::from_secs(10)),
        recording().0,
    )
    .with_cached_token(token);
    assert!(seeded.verification().is_none());
}

#[tokio::test]
async fn test_unbounded_timeout_still_completes() {
    let (presenter, mut launches) = recording();
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::MAX), presenter);

    let browser = tokio::spawn(async move {
        let launch = launches.recv().await.expect("launch presented");
        relay_get(
            launch.port,
            "/token",
            &payload("patient", launch.nonce.as_str()),
            true,
        )
        .await
        .status()
        .as_u16()
    });

    let token = coordinator.connect().await.expect("connect");
    assert_eq!(browser.await.expect("browser task"), 200);
    assert_eq!(token.bearer, "patient");
    assert!(coordinator.options().effective_timeout() < Duration::MAX);
}

#[tokio::test]
async fn test_zero_poll_interval_is_rejected_before_binding() {
    let (presenter, mut launches) = recording();
    let options = ConnectOptions {
        poll_interval: Duration::ZERO,
        ..ConnectOptions::default()
    };
    let mut coordinator = FlowCoordinator::new(settings(), options, presenter);

    let err = coordinator.connect().await.expect_err("invalid options");
    assert!(matches!(err, AuthError::InvalidConfiguration(_)));
    assert!(coordinator.port().is_none());
    assert_eq!(coordinator.state(), FlowState::Idle);
    assert!(launches.try_recv().is_err());
}

#[tokio::test]
async fn test_complete_from_pasted_redirect() {
    let (presenter, _launches) = recording();
    let mut coordinator =
        FlowCoordinator::new(settings(), options(Duration::from_secs(10)), presenter);
    let launch = coordinator.start().await.expect("start");

    let forged = format!(
        "http://localhost:8888/user-redirect/jupyter_oauth2/callback\
         #access_token=bad&id_token={}&state=nbauth,x",
        make_jwt(&json!({"nonce": "x", "exp": 9_999_999_999i64}))
    );
    let err = coordinator
        .complete_from_redirect(&forged)
        .await
        .expect_err("nonce mismatch");
    assert!(matches!(err, AuthError::NonceMismatch));
    assert!(coordinator.is_listening());

    let denied = coordinator
        .complete_from_redirect("http://localhost/cb#error=access_denied&state=s")
        .await
        .expect_err("provider error");
    assert!(matches!(denied, AuthError::ProviderError { .. }));

    let redirect = format!(
        "http://localhost:8888/user-redirect/jupyter_oauth2/callback\
         #access_token=pasted&id_token={}&state=nbauth,{}&token_type=Bearer",
        make_jwt(&json!({"nonce": launch.nonce.as_str(), "exp": 9_999_999_999i64})),
        launch.nonce
    );
    let token = coordinator
        .complete_from_redirect(&redirect)
        .await
        .expect("pasted redirect");
    assert_eq!(token.bearer, "pasted");
    assert!(port_closed(launch.port).await);
}

#[tokio::test]
async fn test_concurrent_flows_use_distinct_ports() {
    let (first_presenter, _first) = recording();
    let (second_presenter, _second) = recording();
    let mut first =
        FlowCoordinator::new(settings(), options(Duration::from_secs(10)), first_presenter);
    let mut second =
        FlowCoordinator::new(settings(), options(Duration::from_secs(10)), second_presenter);

    let a = first.start().await.expect("first start");
    let b = second.start().await.expect("second start");
    assert_ne!(a.port, b.port);
    assert_ne!(a.nonce, b.nonce);

    // A token for one flow is not accepted by the other.
    let resp = relay_get(b.port, "/token", &payload("tok", a.nonce.as_str()), true).await;
    assert_eq!(resp.status(), 403);

    first.stop().await;
    second.stop().await;
    assert!(port_closed(a.port).await);
    assert!(port_closed(b.port).await);
}
