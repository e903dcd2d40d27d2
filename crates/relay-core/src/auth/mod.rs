//! ============================================================================
//! Auth Module - Authorization Flows and Request Credentials
//! ============================================================================
//! - OAuth 2.0 authorization code + PKCE (bearer tokens)
//! - OAuth 1.0a three-legged flow (HMAC-SHA1 signed requests)
//! - `Credentials`: whichever of the two a flow produced, able to
//!   authorize any outbound API call
//! ============================================================================

pub mod oauth1;
mod oauth2;
pub mod pkce;

pub use oauth1::{OAuth1Credentials, Signer};
pub use oauth2::{AuthorizationRequest, OAuth2Client};

use crate::types::AccessToken;

/// Credentials obtained by a completed flow
#[derive(Debug, Clone)]
pub enum Credentials {
    Bearer(AccessToken),
    OAuth1(OAuth1Credentials),
}

impl Credentials {
    /// `Authorization` header value for a request.
    ///
    /// `url` must not carry a query string; `params` are the query or form
    /// parameters the request sends (only OAuth 1.0a signs them).
    pub fn authorization(&self, method: &str, url: &str, params: &[(&str, &str)]) -> String {
        match self {
            Credentials::Bearer(token) => format!("Bearer {}", token.value),
            Credentials::OAuth1(creds) => {
                Signer::new(&creds.consumer_key, &creds.consumer_secret).authorization(
                    method,
                    url,
                    Some((&creds.token, &creds.token_secret)),
                    params,
                )
            }
        }
    }

    /// The bearer token, if this is an OAuth 2.0 credential
    pub fn access_token(&self) -> Option<&AccessToken> {
        match self {
            Credentials::Bearer(token) => Some(token),
            Credentials::OAuth1(_) => None,
        }
    }
}
