use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::nonce::Nonce;
use crate::settings::ReusePolicy;
use crate::token::{AccessToken, TokenPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Pending,
    TokenReceived,
    TimedOut,
    /// The last delivery carried the wrong nonce. The flow keeps waiting.
    InvalidNonce,
}

impl FlowStatus {
    /// Whether the session can still accept a token.
    pub fn is_awaiting(self) -> bool {
        !matches!(self, FlowStatus::TokenReceived)
    }
}

/// How a stored token was vetted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The embedded `id_token.nonce` matched this session's nonce.
    Nonce,
    /// Handed back by the browser from its cache without a nonce round-trip.
    Reused,
}

#[derive(Debug, Clone)]
pub struct ReceivedToken {
    pub payload: TokenPayload,
    pub verification: Verification,
    pub received_at: SystemTime,
}

impl ReceivedToken {
    pub fn access_token(&self) -> AccessToken {
        self.payload.access_token()
    }
}

#[derive(Debug)]
pub enum IntakeOutcome {
    Accepted(Verification),
    /// A token was already stored; the delivery was ignored.
    Duplicate,
    Rejected(AuthError),
}

/// State of one authentication attempt, shared between the listener task and
/// the coordinator.
#[derive(Debug)]
pub struct FlowSession {
    nonce: Nonce,
    listener_port: Option<u16>,
    status: FlowStatus,
    token: Option<ReceivedToken>,
    reuse_policy: ReusePolicy,
    rejected: u32,
}

pub type SharedSession = Arc<Mutex<FlowSession>>;

impl FlowSession {
    pub fn new(nonce: Nonce, reuse_policy: ReusePolicy) -> Self {
        Self {
            nonce,
            listener_port: None,
            status: FlowStatus::Pending,
            token: None,
            reuse_policy,
            rejected: 0,
        }
    }

    pub fn shared(nonce: Nonce, reuse_policy: ReusePolicy) -> SharedSession {
        Arc::new(Mutex::new(Self::new(nonce, reuse_policy)))
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn listener_port(&self) -> Option<u16> {
        self.listener_port
    }

    pub(crate) fn set_listener_port(&mut self, port: u16) {
        self.listener_port = Some(port);
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn token(&self) -> Option<&ReceivedToken> {
        self.token.as_ref()
    }

    /// Number of deliveries rejected so far.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    pub fn mark_timed_out(&mut self) {
        if self.status.is_awaiting() {
            self.status = FlowStatus::TimedOut;
        }
    }

    pub fn submit(&mut self, payload: TokenPayload, verify: bool) -> IntakeOutcome {
        self.submit_at(payload, verify, SystemTime::now())
    }

    /// Run one delivery through verification. Only the first accepted
    /// delivery is stored; later ones are reported as duplicates.
    pub fn submit_at(
        &mut self,
        payload: TokenPayload,
        verify: bool,
        now: SystemTime,
    ) -> IntakeOutcome {
        if self.token.is_some() {
            debug!("Token already received, ignoring duplicate delivery");
            return IntakeOutcome::Duplicate;
        }

        let verification = if verify {
            match payload.nonce() {
                Some(nonce) if self.nonce.matches(nonce) => Verification::Nonce,
                _ => {
                    warn!("Invalid token: nonce does not match");
                    self.status = FlowStatus::InvalidNonce;
                    self.rejected += 1;
                    return IntakeOutcome::Rejected(AuthError::NonceMismatch);
                }
            }
        } else {
            let fresh = payload
                .id_token
                .as_ref()
                .is_some_and(|claims| claims.is_unexpired(now));
            if self.reuse_policy == ReusePolicy::RequireUnexpired && !fresh {
                warn!("Rejecting reused token without a future expiry");
                self.rejected += 1;
                return IntakeOutcome::Rejected(AuthError::StaleToken);
            }
            Verification::Reused
        };

        info!(verified = verification == Verification::Nonce, "Token accepted");
        self.token = Some(ReceivedToken {
            payload,
            verification,
            received_at: now,
        });
        self.status = FlowStatus::TokenReceived;
        IntakeOutcome::Accepted(verification)
    }
}
