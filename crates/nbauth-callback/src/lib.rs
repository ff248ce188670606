//! HTTP server for the Callback Page.
//!
//! The notebook proxy routes `<base>/jupyter_oauth2/` to this process, so the
//! identity provider's redirect lands on `/callback` here.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use nbauth_core::{OriginPolicy, Settings, callback_page};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const CALLBACK_ROUTE: &str = "/callback";

/// Render the page once for the given proxy base URL.
pub fn render_page(base_url: &str, origin_policy: OriginPolicy) -> nbauth_core::Result<String> {
    let target_origin = match origin_policy {
        OriginPolicy::Strict => {
            let settings = Settings {
                base_url: base_url.to_string(),
                ..Settings::default()
            };
            Some(settings.proxy_origin()?)
        }
        OriginPolicy::Any => None,
    };
    callback_page::render(target_origin.as_deref())
}

pub fn router(page: Arc<str>) -> Router {
    Router::new()
        .route("/", get(health))
        .route(CALLBACK_ROUTE, get(callback))
        .with_state(page)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    page: Arc<str>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Callback page available at http://{}{}", addr, CALLBACK_ROUTE);
    }
    axum::serve(listener, router(page))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health() -> &'static str {
    "OK"
}

async fn callback(State(page): State<Arc<str>>) -> Response {
    (
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store")],
        Html(page.to_string()),
    )
        .into_response()
}
