//! Browser-relayed OAuth2 token acquisition for notebook sessions.
//!
//! A per-flow [`TokenListener`] receives the token that the browser relays from
//! the fixed-URL Callback Page, checks it against the flow's [`Nonce`] and
//! hands it to the [`FlowCoordinator`]. [`ApiClient`] spends the token.

pub mod api;
pub mod callback_page;
pub mod error;
pub mod flow;
mod html;
pub mod launcher;
pub mod listener;
pub mod nonce;
pub mod session;
pub mod settings;
pub mod token;

pub use api::{ApiClient, ApiResponse, UserInfo};
pub use callback_page::{AuthStatus, RelayMessage};
pub use error::{AuthError, Result};
pub use flow::{ConnectOptions, FlowCoordinator, FlowState, Presenter};
pub use launcher::{Launch, LaunchMode, Launcher};
pub use listener::TokenListener;
pub use nonce::Nonce;
pub use session::{FlowSession, FlowStatus, ReceivedToken, SharedSession, Verification};
pub use settings::{OriginPolicy, ReusePolicy, Settings};
pub use token::{AccessToken, TokenPayload};
