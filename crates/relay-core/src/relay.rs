//! ============================================================================
//! Authorization-Code Relay - Routes, Initiator and Callback
//! ============================================================================
//! Transport-independent request handling:
//!   GET /                    -> home page with login link
//!   GET /auth/x, /api/auth   -> redirect to the provider with fresh state
//!   GET /api/callback        -> verify state, exchange code, run actions
//!   GET /update-profile      -> run actions with preconfigured OAuth 1.0a tokens
//!   GET /health              -> liveness
//!
//! Every failure is rendered as a page; nothing here can take the process
//! down, and nothing is retried.
//! ============================================================================

use anyhow::{anyhow, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::actions::{run_actions, FailurePolicy, FlowReport};
use crate::auth::{oauth1, Credentials, OAuth1Credentials, OAuth2Client, Signer};
use crate::config::{Protocol, RelayConfig};
use crate::engage::{TokenVault, VaultEntry};
use crate::executor::TwitterApi;
use crate::pages;
use crate::session::{MemorySessionStore, SessionStore};
use crate::types::{AuthSession, RelayError, RelayResult, SessionSecret};

/// Path the home page links to
pub const LOGIN_PATH: &str = "/auth/x";

/// Runs the actions with the operator's own access token, no login
pub const PREAUTHORIZED_PATH: &str = "/update-profile";

/// An incoming browser request, stripped to what the relay routes on
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

impl RelayRequest {
    /// Parse a request line target such as `/api/callback?code=..&state=..`
    pub fn from_target(method: &str, target: &str) -> Self {
        match url::Url::parse(&format!("http://localhost{}", target)) {
            Ok(parsed) => Self {
                method: method.to_uppercase(),
                path: parsed.path().to_string(),
                query: parsed.query_pairs().into_owned().collect(),
            },
            Err(e) => {
                debug!("Unparseable request target {}: {}", target, e);
                Self {
                    method: method.to_uppercase(),
                    path: target.to_string(),
                    query: HashMap::new(),
                }
            }
        }
    }

    pub fn get(target: &str) -> Self {
        Self::from_target("GET", target)
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// What goes back to the browser
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RelayResponse {
    pub fn html(status: u16, body: String) -> Self {
        Self {
            status,
            headers: vec![(
                "Content-Type".to_string(),
                "text/html; charset=utf-8".to_string(),
            )],
            body,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![(
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: body.to_string(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            headers: vec![
                ("Location".to_string(), location.to_string()),
                ("Cache-Control".to_string(), "no-store".to_string()),
            ],
            body: String::new(),
        }
    }

    fn failure(err: &RelayError) -> Self {
        Self::html(err.status_code(), pages::failure(err))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The relay: configuration, pending sessions and the API client
pub struct Relay {
    config: RelayConfig,
    sessions: Arc<dyn SessionStore>,
    client: Client,
    api: TwitterApi,
    vault: TokenVault,
}

impl Relay {
    /// Relay with an in-memory session store
    pub fn new(config: RelayConfig) -> Result<Self> {
        let store = Arc::new(MemorySessionStore::new(config.session_ttl_secs));
        Self::with_session_store(config, store)
    }

    pub fn with_session_store(config: RelayConfig, sessions: Arc<dyn SessionStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        let api = TwitterApi::new(
            client.clone(),
            config.endpoints.api_base.clone(),
            config.endpoints.upload_base.clone(),
            config.media_poll.clone(),
        );

        Ok(Self {
            config,
            sessions,
            client,
            api,
            vault: TokenVault::new(),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn api(&self) -> &TwitterApi {
        &self.api
    }

    pub fn vault(&self) -> TokenVault {
        self.vault.clone()
    }

    /// OAuth 2.0 client, or the diagnostic for whatever credential is missing
    pub fn oauth2_client(&self) -> RelayResult<OAuth2Client> {
        let (client_id, callback) = self.config.require_oauth2()?;
        Ok(OAuth2Client::new(
            self.client.clone(),
            client_id,
            self.config.client_secret.clone(),
            callback,
            self.config.endpoints.authorize_url.clone(),
            self.config.endpoints.token_url.clone(),
        ))
    }

    /// Route one request
    pub async fn handle(&self, request: &RelayRequest) -> RelayResponse {
        info!("{} {}", request.method, request.path);

        if request.method != "GET" {
            let mut response = RelayResponse::html(405, pages::method_not_allowed());
            response.headers.push(("Allow".to_string(), "GET".to_string()));
            return response;
        }

        match request.path.as_str() {
            "/" => {
                let direct = self
                    .config
                    .has_preauthorized_token()
                    .then_some(PREAUTHORIZED_PATH);
                RelayResponse::html(200, pages::home(LOGIN_PATH, direct, &self.config.actions))
            }
            "/auth/x" | "/api/auth" => match self.start_authorization().await {
                Ok(location) => RelayResponse::redirect(&location),
                Err(err) => {
                    warn!("Authorization start failed: {}", err);
                    RelayResponse::failure(&err)
                }
            },
            "/api/callback" => match self.complete_authorization(request).await {
                Ok(report) => self.render_report(&report),
                Err(err) => {
                    warn!("Callback failed: {}", err);
                    RelayResponse::failure(&err)
                }
            },
            PREAUTHORIZED_PATH => match self.run_preauthorized().await {
                Ok(report) => self.render_report(&report),
                Err(err) => {
                    warn!("Preauthorized run failed: {}", err);
                    RelayResponse::failure(&err)
                }
            },
            "/health" => RelayResponse::text(200, "ok"),
            other => RelayResponse::html(404, pages::not_found(other)),
        }
    }

    fn render_report(&self, report: &FlowReport) -> RelayResponse {
        let status = match (self.config.failure_policy, report.first_error()) {
            (FailurePolicy::BestEffort, Some(err)) if report.succeeded() == 0 => err.status_code(),
            _ => 200,
        };
        RelayResponse::html(status, pages::report(report))
    }

    /// Store a fresh session and return where to send the browser
    async fn start_authorization(&self) -> RelayResult<String> {
        match self.config.protocol {
            Protocol::OAuth2 => {
                let oauth = self.oauth2_client()?;
                let request = oauth.authorization_request(&self.config.scopes());
                self.sessions
                    .put(AuthSession::pkce(request.state, request.code_verifier))
                    .await;
                Ok(request.url)
            }
            Protocol::OAuth1 => {
                let (key, secret, callback) = self.config.require_oauth1()?;
                let signer = Signer::new(key, secret);
                let base = &self.config.endpoints.oauth1_base;
                let token = oauth1::request_token(&self.client, &signer, base, callback).await?;
                let location = oauth1::authenticate_url(base, &token.token);
                self.sessions
                    .put(AuthSession::request_token(token.token, token.token_secret))
                    .await;
                Ok(location)
            }
        }
    }

    /// Callback sequence; each step is fatal to the ones after it
    async fn complete_authorization(&self, request: &RelayRequest) -> RelayResult<FlowReport> {
        let creds = match self.config.protocol {
            Protocol::OAuth2 => self.oauth2_callback(request).await?,
            Protocol::OAuth1 => self.oauth1_callback(request).await?,
        };

        let user = self.api.me(&creds).await?;
        info!("Authorized as @{}", user.username);
        self.vault
            .store(VaultEntry {
                credentials: creds.clone(),
                user: user.clone(),
            })
            .await;

        run_actions(
            &self.api,
            &creds,
            user,
            &self.config.actions,
            self.config.failure_policy,
        )
        .await
    }

    /// Act on the account owning `X_ACCESS_TOKEN`, skipping the login dance
    async fn run_preauthorized(&self) -> RelayResult<FlowReport> {
        let creds = Credentials::OAuth1(self.config.require_preauthorized()?);
        let user = self.api.me(&creds).await?;
        info!("Running actions for preauthorized account @{}", user.username);

        run_actions(
            &self.api,
            &creds,
            user,
            &self.config.actions,
            self.config.failure_policy,
        )
        .await
    }

    async fn oauth2_callback(&self, request: &RelayRequest) -> RelayResult<Credentials> {
        if let Some(error) = request.param("error") {
            // The login is over either way; its state must not stay redeemable
            if let Some(state) = request.param("state") {
                self.sessions.take(state).await;
            }
            return Err(RelayError::ProviderDenied {
                error: error.to_string(),
                description: request
                    .param("error_description")
                    .unwrap_or("no description given")
                    .to_string(),
            });
        }

        let code = request.param("code").ok_or(RelayError::MissingCode)?;
        let state = request.param("state").ok_or(RelayError::InvalidState)?;

        let session = self
            .sessions
            .take(state)
            .await
            .ok_or(RelayError::InvalidState)?;
        let SessionSecret::Pkce { code_verifier } = session.secret else {
            return Err(RelayError::InvalidState);
        };

        let oauth = self.oauth2_client()?;
        let token = oauth.exchange_code(code, &code_verifier).await?;
        Ok(Credentials::Bearer(token))
    }

    async fn oauth1_callback(&self, request: &RelayRequest) -> RelayResult<Credentials> {
        if let Some(denied) = request.param("denied") {
            // Drop the pending session so the denied token cannot be replayed
            self.sessions.take(denied).await;
            return Err(RelayError::ProviderDenied {
                error: "access_denied".to_string(),
                description: "The authorization request was declined".to_string(),
            });
        }

        let (Some(token), Some(verifier)) =
            (request.param("oauth_token"), request.param("oauth_verifier"))
        else {
            return Err(RelayError::MissingCode);
        };

        let session = self
            .sessions
            .take(token)
            .await
            .ok_or(RelayError::InvalidState)?;
        let SessionSecret::RequestToken { token_secret } = session.secret else {
            return Err(RelayError::InvalidState);
        };

        let (key, secret, _) = self.config.require_oauth1()?;
        let signer = Signer::new(key, secret);
        let grant = oauth1::access_token(
            &self.client,
            &signer,
            &self.config.endpoints.oauth1_base,
            &oauth1::RequestToken {
                token: token.to_string(),
                token_secret,
            },
            verifier,
        )
        .await?;

        debug!(
            "OAuth 1.0a grant for user {:?} (@{:?})",
            grant.user_id, grant.screen_name
        );
        Ok(Credentials::OAuth1(OAuth1Credentials {
            consumer_key: key.to_string(),
            consumer_secret: secret.to_string(),
            token: grant.token,
            token_secret: grant.token_secret,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubResponse, StubServer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub provider: token endpoint, REST API and media upload in one
    fn provider(tweet_status: u16) -> StubServer {
        StubServer::start(move |req| match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/2/oauth2/token") => StubResponse::json(
                200,
                r#"{"token_type":"bearer","access_token":"stub-token","expires_in":7200,"scope":"tweet.read users.read"}"#,
            ),
            ("POST", "/oauth/request_token") => StubResponse::text(
                200,
                "oauth_token=rt&oauth_token_secret=rts&oauth_callback_confirmed=true",
            ),
            ("POST", "/oauth/access_token") => StubResponse::text(
                200,
                "oauth_token=at&oauth_token_secret=ats&user_id=42&screen_name=alice",
            ),
            ("GET", "/2/users/me") => {
                StubResponse::json(200, r#"{"data":{"id":"42","username":"alice","name":"Alice"}}"#)
            }
            ("POST", "/1.1/account/update_profile.json") => {
                StubResponse::json(200, r#"{"screen_name":"alice"}"#)
            }
            ("GET", "/avatar.png") => StubResponse::bytes(200, "image/png", vec![1, 2, 3]),
            ("POST", "/1.1/media/upload.json") => {
                if req.body.contains("FINALIZE") {
                    StubResponse::json(201, r#"{"media_id_string":"555"}"#)
                } else if req.body.contains("APPEND") {
                    StubResponse::empty(204)
                } else {
                    StubResponse::json(202, r#"{"media_id_string":"555"}"#)
                }
            }
            ("POST", "/2/tweets") => {
                StubResponse::json(tweet_status, r#"{"data":{"id":"1001","text":"gm"}}"#)
            }
            _ => StubResponse::empty(404),
        })
    }

    fn config(stub: &StubServer, extra: &[(&str, &str)]) -> RelayConfig {
        let mut vars: HashMap<String, String> = HashMap::new();
        for (k, v) in [
            ("X_CLIENT_ID", "cid"),
            ("X_CLIENT_SECRET", "csecret"),
            ("X_API_KEY", "ck"),
            ("X_API_SECRET", "cs"),
            ("CALLBACK_URL", "http://localhost:3000/api/callback"),
            ("PROFILE_VALUE", "hello"),
            ("MEDIA_POLL_BASE_DELAY_MS", "1"),
        ] {
            vars.insert(k.to_string(), v.to_string());
        }
        vars.insert("X_AUTHORIZE_URL".into(), stub.url("/i/oauth2/authorize"));
        vars.insert("X_TOKEN_URL".into(), stub.url("/2/oauth2/token"));
        vars.insert("X_API_BASE".into(), stub.base());
        vars.insert("X_UPLOAD_BASE".into(), stub.base());
        vars.insert("X_OAUTH1_BASE".into(), stub.base());
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        RelayConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    fn relay(stub: &StubServer, extra: &[(&str, &str)]) -> Relay {
        Relay::new(config(stub, extra)).unwrap()
    }

    /// Start a login and return the state carried by the redirect
    async fn login(relay: &Relay) -> (RelayResponse, String) {
        let response = relay.handle(&RelayRequest::get("/auth/x")).await;
        let location = response.header("location").unwrap().to_string();
        let parsed = url::Url::parse(&location).unwrap();
        let state = parsed
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        (response, state)
    }

    fn count(stub: &StubServer, path: &str) -> usize {
        stub.requests().iter().filter(|r| r.path == path).count()
    }

    #[tokio::test]
    async fn test_home_page() {
        let stub = provider(201);
        let response = relay(&stub, &[]).handle(&RelayRequest::get("/")).await;
        assert_eq!(response.status, 200);
        assert!(response.body.contains("/auth/x"));
    }

    #[tokio::test]
    async fn test_redirect_carries_stored_state() {
        let stub = provider(201);
        let relay = relay(&stub, &[]);
        let (response, state) = login(&relay).await;

        assert_eq!(response.status, 302);
        let location = response.header("location").unwrap();
        assert!(location.starts_with(&stub.url("/i/oauth2/authorize?")));
        assert!(location.contains("response_type=code"));
        assert!(location.contains("client_id=cid"));
        assert!(location.contains("code_challenge_method=S256"));
        assert_eq!(relay.sessions.len().await, 1);

        let session = relay.sessions.take(&state).await.unwrap();
        let SessionSecret::Pkce { code_verifier } = session.secret else {
            panic!("expected a PKCE session");
        };
        assert!(location.contains(&crate::auth::pkce::code_challenge(&code_verifier)));
    }

    #[tokio::test]
    async fn test_api_auth_alias() {
        let stub = provider(201);
        let response = relay(&stub, &[]).handle(&RelayRequest::get("/api/auth")).await;
        assert_eq!(response.status, 302);
    }

    #[tokio::test]
    async fn test_missing_credentials_render_diagnostic() {
        let stub = provider(201);
        let relay = relay(&stub, &[("X_CLIENT_ID", "")]);
        let response = relay.handle(&RelayRequest::get("/auth/x")).await;
        assert_eq!(response.status, 500);
        assert!(response.body.contains("X_CLIENT_ID"));
        assert!(response.header("location").is_none());
    }

    #[tokio::test]
    async fn test_full_flow_and_state_is_single_use() {
        let stub = provider(201);
        let relay = relay(&stub, &[]);
        let (_, state) = login(&relay).await;

        let callback = RelayRequest::get(&format!("/api/callback?code=abc&state={}", state));
        let response = relay.handle(&callback).await;
        assert_eq!(response.status, 200, "{}", response.body);
        assert!(response.body.contains("@alice"));
        assert!(response.body.contains("Profile description set to"));
        assert_eq!(count(&stub, "/2/oauth2/token"), 1);

        let token_request = stub
            .requests()
            .into_iter()
            .find(|r| r.path == "/2/oauth2/token")
            .unwrap();
        assert!(token_request.body.contains("code=abc"));
        assert!(token_request.header("authorization").unwrap().starts_with("Basic "));

        // Replaying the same state is rejected without another exchange
        let replay = relay.handle(&callback).await;
        assert_eq!(replay.status, 400);
        assert_eq!(count(&stub, "/2/oauth2/token"), 1);

        let stored = relay.vault().get().await.unwrap();
        assert_eq!(stored.user.username, "alice");
    }

    #[tokio::test]
    async fn test_unknown_state_never_exchanges() {
        let stub = provider(201);
        let relay = relay(&stub, &[]);
        let response = relay
            .handle(&RelayRequest::get("/api/callback?code=abc&state=guessed"))
            .await;
        assert_eq!(response.status, 400);
        assert!(response.body.contains("Invalid or expired login session"));
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_and_missing_code() {
        let stub = provider(201);
        let relay = relay(&stub, &[]);
        let (_, state) = login(&relay).await;

        let denied = relay
            .handle(&RelayRequest::get(
                "/api/callback?error=access_denied&error_description=User%20said%20no",
            ))
            .await;
        assert_eq!(denied.status, 400);
        assert!(denied.body.contains("User said no"));

        let incomplete = relay
            .handle(&RelayRequest::get(&format!("/api/callback?state={}", state)))
            .await;
        assert_eq!(incomplete.status, 400);
        assert!(incomplete.body.contains("Authorization flow incomplete"));
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_bearer_token_on_every_downstream_call() {
        let stub = provider(201);
        let image = stub.url("/avatar.png");
        let relay = relay(
            &stub,
            &[
                ("RELAY_ACTIONS", "update_profile,post_tweet"),
                ("TWEET_TEXT", "gm"),
                ("TARGET_IMAGE_URL", image.as_str()),
            ],
        );
        let (_, state) = login(&relay).await;
        let response = relay
            .handle(&RelayRequest::get(&format!("/api/callback?code=abc&state={}", state)))
            .await;
        assert_eq!(response.status, 200, "{}", response.body);

        let downstream: Vec<_> = stub
            .requests()
            .into_iter()
            .filter(|r| r.path.starts_with("/2/users") || r.path.starts_with("/1.1/") || r.path == "/2/tweets")
            .collect();
        assert!(downstream.len() >= 5);
        for req in downstream {
            assert_eq!(req.header("authorization").as_deref(), Some("Bearer stub-token"), "{}", req.path);
        }
    }

    #[tokio::test]
    async fn test_upload_failure_prevents_post() {
        let uploads = Arc::new(AtomicUsize::new(0));
        let stub = {
            let uploads = Arc::clone(&uploads);
            StubServer::start(move |req| match req.path.as_str() {
                "/2/oauth2/token" => StubResponse::json(200, r#"{"access_token":"stub-token"}"#),
                "/2/users/me" => {
                    StubResponse::json(200, r#"{"data":{"id":"42","username":"alice","name":"Alice"}}"#)
                }
                "/avatar.png" => StubResponse::bytes(200, "image/png", vec![1, 2, 3]),
                "/1.1/media/upload.json" => {
                    uploads.fetch_add(1, Ordering::SeqCst);
                    StubResponse::json(503, r#"{"errors":[{"message":"Over capacity"}]}"#)
                }
                _ => StubResponse::json(201, r#"{"data":{"id":"1"}}"#),
            })
        };
        let image = stub.url("/avatar.png");
        let relay = relay(
            &stub,
            &[
                ("RELAY_ACTIONS", "post_tweet"),
                ("TWEET_TEXT", "gm"),
                ("TARGET_IMAGE_URL", image.as_str()),
            ],
        );
        let (_, state) = login(&relay).await;
        let response = relay
            .handle(&RelayRequest::get(&format!("/api/callback?code=abc&state={}", state)))
            .await;

        assert_eq!(response.status, 502);
        assert!(response.body.contains("Over capacity"));
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(count(&stub, "/2/tweets"), 0);
    }

    #[tokio::test]
    async fn test_best_effort_reports_partial_success() {
        let stub = provider(403);
        let relay = relay(
            &stub,
            &[
                ("RELAY_ACTIONS", "post_tweet,update_profile"),
                ("TWEET_TEXT", "gm"),
                ("RELAY_FAILURE_POLICY", "best-effort"),
            ],
        );
        let (_, state) = login(&relay).await;
        let response = relay
            .handle(&RelayRequest::get(&format!("/api/callback?code=abc&state={}", state)))
            .await;

        assert_eq!(response.status, 200);
        assert!(response.body.contains("PARTIALLY DONE"));
        assert_eq!(count(&stub, "/1.1/account/update_profile.json"), 1);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_after_failed_tweet() {
        let stub = provider(403);
        let relay = relay(
            &stub,
            &[("RELAY_ACTIONS", "post_tweet,update_profile"), ("TWEET_TEXT", "gm")],
        );
        let (_, state) = login(&relay).await;
        let response = relay
            .handle(&RelayRequest::get(&format!("/api/callback?code=abc&state={}", state)))
            .await;

        assert_eq!(response.status, 502);
        assert_eq!(count(&stub, "/1.1/account/update_profile.json"), 0);
    }

    #[tokio::test]
    async fn test_oauth1_flow() {
        let stub = provider(201);
        let relay = relay(&stub, &[("RELAY_PROTOCOL", "oauth1")]);

        let start = relay.handle(&RelayRequest::get("/auth/x")).await;
        assert_eq!(start.status, 302);
        assert_eq!(
            start.header("location").unwrap(),
            format!("{}/oauth/authenticate?oauth_token=rt", stub.base())
        );

        let callback = RelayRequest::get("/api/callback?oauth_token=rt&oauth_verifier=v");
        let response = relay.handle(&callback).await;
        assert_eq!(response.status, 200, "{}", response.body);

        let update = stub
            .requests()
            .into_iter()
            .find(|r| r.path == "/1.1/account/update_profile.json")
            .unwrap();
        let auth = update.header("authorization").unwrap();
        assert!(auth.starts_with("OAuth "));
        assert!(auth.contains("oauth_token=\"at\""));

        let replay = relay.handle(&callback).await;
        assert_eq!(replay.status, 400);
    }

    #[tokio::test]
    async fn test_oauth1_denied() {
        let stub = provider(201);
        let relay = relay(&stub, &[("RELAY_PROTOCOL", "oauth1")]);
        relay.handle(&RelayRequest::get("/auth/x")).await;

        let response = relay.handle(&RelayRequest::get("/api/callback?denied=rt")).await;
        assert_eq!(response.status, 400);
        assert_eq!(relay.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn test_provider_error_consumes_state() {
        let stub = provider(201);
        let relay = relay(&stub, &[]);
        let (_, state) = login(&relay).await;
        assert_eq!(relay.sessions.len().await, 1);

        let denied = relay
            .handle(&RelayRequest::get(&format!(
                "/api/callback?error=access_denied&state={}",
                state
            )))
            .await;
        assert_eq!(denied.status, 400);
        assert_eq!(relay.sessions.len().await, 0);

        // A late code for the same state is now an unknown state
        let late = relay
            .handle(&RelayRequest::get(&format!("/api/callback?code=abc&state={}", state)))
            .await;
        assert_eq!(late.status, 400);
        assert_eq!(count(&stub, "/2/oauth2/token"), 0);
    }

    #[tokio::test]
    async fn test_preauthorized_update_signs_with_configured_token() {
        let stub = provider(201);
        let relay = relay(
            &stub,
            &[
                ("X_ACCESS_TOKEN", "owner-token"),
                ("X_ACCESS_TOKEN_SECRET", "owner-secret"),
            ],
        );

        let home = relay.handle(&RelayRequest::get("/")).await;
        assert!(home.body.contains(r#"href="/update-profile""#));

        let response = relay.handle(&RelayRequest::get("/update-profile")).await;
        assert_eq!(response.status, 200, "{}", response.body);
        assert!(response.body.contains("@alice"));
        assert!(response.body.contains("Profile description set to"));

        let update = stub
            .requests()
            .into_iter()
            .find(|r| r.path == "/1.1/account/update_profile.json")
            .unwrap();
        assert!(update.body.contains("description=hello"));
        let auth = update.header("authorization").unwrap();
        assert!(auth.starts_with("OAuth "));
        assert!(auth.contains("oauth_consumer_key=\"ck\""));
        assert!(auth.contains("oauth_token=\"owner-token\""));

        // No login dance happened
        assert_eq!(count(&stub, "/2/oauth2/token"), 0);
        assert_eq!(count(&stub, "/oauth/access_token"), 0);
        assert_eq!(relay.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn test_preauthorized_update_without_tokens() {
        let stub = provider(201);
        let relay = relay(&stub, &[("X_ACCESS_TOKEN", "owner-token")]);

        let home = relay.handle(&RelayRequest::get("/")).await;
        assert!(!home.body.contains("/update-profile"));

        let response = relay.handle(&RelayRequest::get("/update-profile")).await;
        assert_eq!(response.status, 500);
        assert!(response.body.contains("X_ACCESS_TOKEN_SECRET"));
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_routing_edges() {
        let stub = provider(201);
        let relay = relay(&stub, &[]);

        let missing = relay.handle(&RelayRequest::get("/nope")).await;
        assert_eq!(missing.status, 404);

        let post = relay
            .handle(&RelayRequest::from_target("POST", "/api/callback"))
            .await;
        assert_eq!(post.status, 405);
        assert_eq!(post.header("allow"), Some("GET"));

        let health = relay.handle(&RelayRequest::get("/health")).await;
        assert_eq!(health.status, 200);
        assert_eq!(health.body, "ok");
    }
}
