//! ============================================================================
//! OAuth 2.0 + PKCE Authorization Code Flow
//! ============================================================================
//! Builds the provider redirect and exchanges the returned code server-side.
//! Confidential clients authenticate to the token endpoint with HTTP Basic;
//! public clients (no secret) send `client_id` in the form instead.
//! ============================================================================

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

use super::pkce;
use crate::types::{AccessToken, RelayError, RelayResult};

/// Everything the initiator needs to redirect and later verify the callback
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// OAuth 2.0 client bound to one registered application
#[derive(Clone)]
pub struct OAuth2Client {
    client: Client,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    authorize_url: String,
    token_url: String,
}

impl OAuth2Client {
    pub fn new(
        client: Client,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        redirect_uri: impl Into<String>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
        }
    }

    /// Generate state + PKCE pair and the authorization URL carrying them
    pub fn authorization_request(&self, scopes: &[String]) -> AuthorizationRequest {
        let verifier = pkce::generate_verifier();
        let challenge = pkce::code_challenge(&verifier);
        let state = pkce::generate_state();

        let url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes.join(" ")),
            &state,
            &challenge
        );

        debug!("Generated auth URL with state: {}", state);
        AuthorizationRequest {
            url,
            state,
            code_verifier: verifier,
        }
    }

    /// Exchange authorization code for an access token
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> RelayResult<AccessToken> {
        info!("Exchanging authorization code for tokens");

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", verifier),
        ];
        self.token_request(&params).await
    }

    /// Refresh an expired token using its refresh_token
    pub async fn refresh(&self, refresh_token: &str) -> RelayResult<AccessToken> {
        info!("Refreshing expired tokens");

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> RelayResult<AccessToken> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        let mut request = self.client.post(&self.token_url);
        match &self.client_secret {
            Some(secret) => request = request.basic_auth(&self.client_id, Some(secret)),
            None => form.push(("client_id", self.client_id.as_str())),
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| RelayError::network("token_exchange", e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("Token exchange failed: {} - {}", status, body);
            return Err(RelayError::TokenExchange { status, body });
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            refresh_token: Option<String>,
            expires_in: Option<i64>,
            scope: Option<String>,
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::invalid("token_exchange", e))?;

        let expires_at = token_response
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs);

        info!(
            "Successfully obtained tokens, expires in {:?} seconds",
            token_response.expires_in
        );

        Ok(AccessToken {
            value: token_response.access_token,
            refresh_token: token_response.refresh_token,
            scope: token_response.scope,
            expires_at,
        })
    }
}
