use base64::{
    Engine,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{AuthError, Result};

/// Decoded `id_token` claims. Only `nonce` and `exp` are interpreted; every
/// other claim is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl IdTokenClaims {
    pub fn expires_at(&self) -> Option<SystemTime> {
        let exp = u64::try_from(self.exp?).ok()?;
        Some(UNIX_EPOCH + Duration::from_secs(exp))
    }

    pub fn is_unexpired(&self, now: SystemTime) -> bool {
        self.expires_at().is_some_and(|at| at > now)
    }
}

/// Token delivery as relayed from the browser: the provider's redirect
/// fields with `id_token` already decoded into claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub access_token: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_id_token"
    )]
    pub id_token: Option<IdTokenClaims>,
    /// Remaining provider response fields (`state`, `token_type`,
    /// `expires_in`, `statusAuth`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdTokenRepr {
    Claims(IdTokenClaims),
    Jwt(String),
}

fn deserialize_id_token<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<IdTokenClaims>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IdTokenRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IdTokenRepr::Claims(claims)) => Ok(Some(claims)),
        Some(IdTokenRepr::Jwt(raw)) => decode_jwt_claims(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl TokenPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        let payload: Self = serde_json::from_value(value)
            .map_err(|e| AuthError::InvalidPayload(format!("Invalid token payload JSON: {e}")))?;
        payload.ensure_access_token()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let payload: Self = serde_json::from_slice(bytes)
            .map_err(|e| AuthError::InvalidPayload(format!("Invalid token payload JSON: {e}")))?;
        payload.ensure_access_token()
    }

    /// Decode the `data` query parameter used by the GET relay.
    pub fn from_data_param(data: &str) -> Result<Self> {
        let bytes = decode_base64_lenient(data)?;
        Self::from_json(&bytes)
    }

    /// Encode as the `data` query parameter used by the GET relay.
    pub fn to_data_param(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AuthError::InvalidPayload(format!("Failed to encode payload: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn ensure_access_token(self) -> Result<Self> {
        if self.access_token.trim().is_empty() {
            return Err(AuthError::InvalidPayload(
                "Empty access_token in token payload".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn nonce(&self) -> Option<&str> {
        self.id_token.as_ref()?.nonce.as_deref()
    }

    pub fn access_token(&self) -> AccessToken {
        AccessToken {
            bearer: self.access_token.clone(),
            expires_at: self.id_token.as_ref().and_then(IdTokenClaims::expires_at),
        }
    }
}

/// Bearer credential handed to API callers.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub bearer: String,
    pub expires_at: Option<SystemTime>,
}

impl AccessToken {
    pub fn new(bearer: impl Into<String>, expires_at: Option<SystemTime>) -> Self {
        Self {
            bearer: bearer.into(),
            expires_at,
        }
    }

    /// Tokens without a known expiry are never considered reusable.
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        !self.bearer.is_empty() && self.expires_at.is_some_and(|at| at > now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(SystemTime::now())
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.bearer)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("bearer", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Decode the claims segment of a JWT without verifying its signature.
pub fn decode_jwt_claims(jwt: &str) -> Result<IdTokenClaims> {
    let payload = jwt
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| AuthError::InvalidPayload("Invalid id_token format".to_string()))?;

    let bytes = decode_base64_lenient(payload)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::InvalidPayload(format!("Invalid id_token payload JSON: {e}")))
}

/// Accepts base64url with or without padding as well as standard base64,
/// including the `+` -> space mangling of form decoding.
pub(crate) fn decode_base64_lenient(input: &str) -> Result<Vec<u8>> {
    let normalized: String = input
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' | ' ' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    URL_SAFE_NO_PAD
        .decode(&normalized)
        .or_else(|_| URL_SAFE.decode(&normalized))
        .map_err(|e| AuthError::InvalidPayload(format!("Invalid base64 payload: {e}")))
}
