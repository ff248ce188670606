use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::callback_page::RelayMessage;
use crate::error::{AuthError, Result};
use crate::launcher::{Launch, LaunchMode, Launcher};
use crate::listener::{TokenListener, bind_addr};
use crate::nonce::Nonce;
use crate::session::{FlowSession, IntakeOutcome, ReceivedToken, Verification};
use crate::settings::{OriginPolicy, ReusePolicy, Settings};
use crate::token::AccessToken;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on a single wait. Larger timeouts are clamped to it.
const MAX_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3_600);

/// Per-flow knobs. Provider configuration lives in [`Settings`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub mode: LaunchMode,
    /// Fixed listener port; `None` lets the OS pick one.
    pub port: Option<u16>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub origin_policy: OriginPolicy,
    pub reuse_policy: ReusePolicy,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            mode: LaunchMode::default(),
            port: None,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            origin_policy: OriginPolicy::default(),
            reuse_policy: ReusePolicy::default(),
        }
    }
}

impl ConnectOptions {
    /// Reject knobs the wait loop cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(AuthError::InvalidConfiguration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(AuthError::InvalidConfiguration(format!(
                "poll_interval must not exceed {}s",
                MAX_POLL_INTERVAL.as_secs()
            )));
        }
        Ok(())
    }

    /// The timeout as the wait loop applies it.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.min(MAX_WAIT)
    }
}

/// Shows a prepared launch to the user: renders the HTML into the notebook,
/// opens a browser, prints a link.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn present(&self, launch: &Launch) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Serving,
    AwaitingToken,
    Completed,
    TimedOut,
}

struct ActiveFlow {
    listener: TokenListener,
    nonce: Nonce,
}

/// Drives one connect attempt at a time: listener, launch, bounded wait and
/// teardown.
pub struct FlowCoordinator {
    settings: Settings,
    options: ConnectOptions,
    presenter: Arc<dyn Presenter>,
    active: Option<ActiveFlow>,
    token: Option<AccessToken>,
    received: Option<ReceivedToken>,
    state: FlowState,
}

impl FlowCoordinator {
    pub fn new(settings: Settings, options: ConnectOptions, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            settings,
            options,
            presenter,
            active: None,
            token: None,
            received: None,
            state: FlowState::Idle,
        }
    }

    /// Seed the coordinator with a token obtained earlier.
    #[must_use]
    pub fn with_cached_token(mut self, token: AccessToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    /// The delivery that produced the current token. `None` for a token
    /// seeded through [`FlowCoordinator::with_cached_token`].
    pub fn received(&self) -> Option<&ReceivedToken> {
        self.received.as_ref()
    }

    /// How the current token was checked on intake: nonce-verified, or taken
    /// on trust through the reuse endpoint.
    pub fn verification(&self) -> Option<Verification> {
        self.received.as_ref().map(|received| received.verification)
    }

    /// Port of the running listener, if any.
    pub fn port(&self) -> Option<u16> {
        self.active.as_ref().map(|flow| flow.listener.port())
    }

    pub fn nonce(&self) -> Option<&Nonce> {
        self.active.as_ref().map(|flow| &flow.nonce)
    }

    pub fn is_listening(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|flow| flow.listener.is_running())
    }

    /// Obtain an access token, reusing a cached unexpired one when possible.
    pub async fn connect(&mut self) -> Result<AccessToken> {
        self.settings.validate()?;
        self.options.validate()?;

        if let Some(token) = self.token.as_ref().filter(|t| t.is_valid()) {
            info!("Reusing cached access token");
            self.state = FlowState::Completed;
            return Ok(token.clone());
        }

        // A listener left running by an earlier timeout may have caught a late
        // delivery in the meantime.
        if let Some(token) = self.try_complete().await {
            return Ok(token);
        }

        self.start().await?;
        self.wait().await
    }

    /// Start the listener and present the authorization UI without waiting.
    /// Any earlier flow still listening is superseded.
    pub async fn start(&mut self) -> Result<Launch> {
        self.settings.validate()?;
        self.options.validate()?;
        self.stop().await;

        let nonce = Nonce::generate();
        let session = FlowSession::shared(nonce.clone(), self.options.reuse_policy);
        let listener = TokenListener::spawn(session, bind_addr(self.options.port)).await?;
        self.state = FlowState::Serving;

        let launch = Launcher::new(self.settings.clone(), self.options.origin_policy).prepare(
            &nonce,
            listener.port(),
            self.options.mode,
        )?;
        self.active = Some(ActiveFlow { listener, nonce });

        if let Err(e) = self.presenter.present(&launch).await {
            warn!("Failed to present authorization launch: {}", e);
            self.stop().await;
            return Err(e);
        }

        self.state = FlowState::AwaitingToken;
        info!(port = launch.port, mode = %launch.mode, "Awaiting access token");
        Ok(launch)
    }

    /// Poll the running flow until a token arrives or the timeout elapses.
    /// On timeout the listener keeps running so [`FlowCoordinator::check`]
    /// can still pick up a late delivery.
    pub async fn wait(&mut self) -> Result<AccessToken> {
        self.options.validate()?;
        let session = self
            .active
            .as_ref()
            .map(|flow| flow.listener.session().clone())
            .ok_or_else(|| AuthError::Listener("No authorization flow in progress".to_string()))?;

        let timeout = self.options.effective_timeout();
        // `None` only if the clock cannot represent the deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Some(token) = self.try_complete().await {
                return Ok(token);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
        }

        session.lock().await.mark_timed_out();
        self.state = FlowState::TimedOut;
        warn!(
            port = self.port(),
            "Timed out after {:?} awaiting access token", timeout
        );
        Err(AuthError::Timeout { waited: timeout })
    }

    /// Re-read the flow without waiting. Completes (and tears the listener
    /// down) if a token has arrived since the last look.
    pub async fn check(&mut self) -> Option<AccessToken> {
        if self.state == FlowState::Completed {
            return self.token.clone();
        }
        self.try_complete().await
    }

    /// Complete the running flow from a redirect URL the user pasted by hand.
    /// The URL goes through the same classification as the Callback Page and
    /// the same nonce-verified intake as a browser delivery.
    pub async fn complete_from_redirect(&mut self, redirect: &str) -> Result<AccessToken> {
        let session = self
            .active
            .as_ref()
            .map(|flow| flow.listener.session().clone())
            .ok_or_else(|| AuthError::Listener("No authorization flow in progress".to_string()))?;

        let payload = RelayMessage::from_redirect(redirect).into_token_payload()?;
        let outcome = session.lock().await.submit(payload, true);
        match outcome {
            IntakeOutcome::Accepted(_) | IntakeOutcome::Duplicate => {}
            IntakeOutcome::Rejected(e) => return Err(e),
        }

        self.try_complete()
            .await
            .ok_or_else(|| AuthError::Listener("Token was accepted but not stored".to_string()))
    }

    /// Tear down the running listener, if any, and forget its session.
    pub async fn stop(&mut self) {
        if let Some(mut flow) = self.active.take() {
            debug!(port = flow.listener.port(), "Stopping authorization flow");
            flow.listener.stop().await;
            if self.state != FlowState::Completed {
                self.state = FlowState::Idle;
            }
        }
    }

    async fn try_complete(&mut self) -> Option<AccessToken> {
        let session = self.active.as_ref()?.listener.session().clone();
        let received = session.lock().await.token()?.clone();
        let token = received.access_token();

        self.stop().await;
        info!(verification = ?received.verification, "Access token received");
        self.token = Some(token.clone());
        self.received = Some(received);
        self.state = FlowState::Completed;
        Some(token)
    }
}
