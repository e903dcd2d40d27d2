//! ============================================================================
//! Core Types for the Authorization-Code Relay
//! ============================================================================
//! Data model shared by the auth flows, the session store, the API executor
//! and the page renderer, plus the error taxonomy every handler funnels into.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Seconds before the real expiry at which a token is treated as expired
const EXPIRY_BUFFER_SECS: i64 = 300;

/// OAuth 2.0 access token obtained once per flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    /// Unix timestamp, None when the provider did not report `expires_in`
    pub expires_at: Option<i64>,
}

impl AccessToken {
    /// Check if the token is expired (with 5 min buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= chrono::Utc::now().timestamp() + EXPIRY_BUFFER_SECS,
            None => false,
        }
    }
}

/// Secret half of a pending authorization, bound to its `state`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSecret {
    /// OAuth 2.0: the PKCE verifier whose challenge went out in the redirect
    Pkce { code_verifier: String },
    /// OAuth 1.0a: the request token secret (the state is the request token)
    RequestToken { token_secret: String },
}

/// A login in progress, created by the initiator and consumed by the callback
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub state: String,
    pub secret: SessionSecret,
    pub created_at: i64,
}

impl AuthSession {
    pub fn pkce(state: String, code_verifier: String) -> Self {
        Self {
            state,
            secret: SessionSecret::Pkce { code_verifier },
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn request_token(oauth_token: String, token_secret: String) -> Self {
        Self {
            state: oauth_token,
            secret: SessionSecret::RequestToken { token_secret },
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// The authorizing account, as reported by `GET /2/users/me`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub name: String,
}

/// Result of a created post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetResult {
    pub tweet_id: String,
    pub url: String,
}

/// A media object that finished server-side processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaUpload {
    pub media_id: String,
}

/// Result alias used across the relay
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Everything that can end a relay request early.
///
/// None of these are fatal to the process: each one is rendered as an HTML
/// page and the listener keeps serving.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("Provider denied authorization: {error} ({description})")]
    ProviderDenied { error: String, description: String },

    #[error("Authorization flow incomplete: no authorization code in callback")]
    MissingCode,

    #[error("Unknown or already used state parameter")]
    InvalidState,

    #[error("Missing configuration: {0}")]
    MissingCredentials(String),

    #[error("Token exchange failed ({status}): {body}")]
    TokenExchange { status: u16, body: String },

    #[error("{step} failed ({status}): {body}")]
    Upstream {
        step: &'static str,
        status: u16,
        body: String,
    },

    #[error("{step} request failed: {message}")]
    Network { step: &'static str, message: String },

    #[error("Unexpected response from {step}: {message}")]
    InvalidResponse { step: &'static str, message: String },

    #[error("Media {media_id} processing failed: {reason}")]
    MediaProcessingFailed { media_id: String, reason: String },

    #[error("Media {media_id} still processing after {attempts} status checks")]
    MediaProcessingTimeout { media_id: String, attempts: u32 },
}

impl RelayError {
    /// HTTP status of the page rendered for this error
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::ProviderDenied { .. }
            | RelayError::MissingCode
            | RelayError::InvalidState => 400,
            RelayError::MissingCredentials(_) => 500,
            RelayError::MediaProcessingTimeout { .. } => 504,
            RelayError::TokenExchange { .. }
            | RelayError::Upstream { .. }
            | RelayError::Network { .. }
            | RelayError::InvalidResponse { .. }
            | RelayError::MediaProcessingFailed { .. } => 502,
        }
    }

    /// Headline for the failure page
    pub fn title(&self) -> &'static str {
        match self {
            RelayError::ProviderDenied { .. } => "Authorization denied",
            RelayError::MissingCode => "Authorization flow incomplete",
            RelayError::InvalidState => "Invalid or expired login session",
            RelayError::MissingCredentials(_) => "Server not configured",
            RelayError::TokenExchange { .. } => "Token exchange failed",
            RelayError::Upstream { .. }
            | RelayError::Network { .. }
            | RelayError::InvalidResponse { .. } => "Request to X failed",
            RelayError::MediaProcessingFailed { .. } => "Media processing failed",
            RelayError::MediaProcessingTimeout { .. } => "Media processing timed out",
        }
    }

    /// Build an `Upstream` error from a non-success response, consuming its body
    pub(crate) async fn from_response(step: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        RelayError::Upstream { step, status, body }
    }

    pub(crate) fn network(step: &'static str, err: reqwest::Error) -> Self {
        RelayError::Network {
            step,
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid(step: &'static str, message: impl std::fmt::Display) -> Self {
        RelayError::InvalidResponse {
            step,
            message: message.to_string(),
        }
    }
}
