//! ============================================================================
//! Relay Configuration
//! ============================================================================
//! Read once from the process environment at startup. Credentials stay
//! optional so that a half-configured deployment still serves pages and
//! reports what is missing instead of refusing to boot.
//! ============================================================================

use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;

use crate::actions::{DownstreamAction, FailurePolicy, ProfileField, MAX_TWEET_CHARS};
use crate::auth::OAuth1Credentials;
use crate::poll::PollConfig;
use crate::types::RelayError;

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_SESSION_TTL_SECS: i64 = 600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ENGAGE_INTERVAL_SECS: u64 = 86_400;

/// Which authorization protocol the initiator and callback speak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// OAuth 2.0 authorization code with PKCE
    OAuth2,
    /// OAuth 1.0a three-legged flow with HMAC-SHA1 signatures
    OAuth1,
}

impl Protocol {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "oauth2" | "oauth2-pkce" | "pkce" => Ok(Protocol::OAuth2),
            "oauth1" | "oauth1a" => Ok(Protocol::OAuth1),
            other => bail!("Unknown RELAY_PROTOCOL '{}'. Valid values: oauth2, oauth1", other),
        }
    }
}

/// Provider endpoints, overridable so tests and staging can point elsewhere
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorize_url: String,
    pub token_url: String,
    /// Base for `/2/...` and `/1.1/...` REST paths
    pub api_base: String,
    /// Base for `/1.1/media/upload.json`
    pub upload_base: String,
    /// Base for `/oauth/request_token`, `/oauth/authenticate`, `/oauth/access_token`
    pub oauth1_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://twitter.com/i/oauth2/authorize".to_string(),
            token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
            api_base: "https://api.twitter.com".to_string(),
            upload_base: "https://upload.twitter.com".to_string(),
            oauth1_base: "https://api.twitter.com".to_string(),
        }
    }
}

/// Recurring like/retweet job settings
#[derive(Debug, Clone)]
pub struct EngageConfig {
    pub target_user_id: String,
    pub interval: Duration,
}

/// Full relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: String,
    pub protocol: Protocol,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Operator's own OAuth 1.0a access token for the no-login mode
    pub access_token: Option<String>,
    pub access_token_secret: Option<String>,
    pub callback_url: Option<String>,
    /// Explicit scope override; None derives scopes from the actions
    pub scopes: Option<Vec<String>>,
    pub actions: Vec<DownstreamAction>,
    pub failure_policy: FailurePolicy,
    pub session_ttl_secs: i64,
    pub http_timeout: Duration,
    pub media_poll: PollConfig,
    pub engage: Option<EngageConfig>,
    pub endpoints: Endpoints,
}

impl RelayConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let protocol = match get("RELAY_PROTOCOL") {
            Some(p) => Protocol::parse(&p)?,
            None => Protocol::OAuth2,
        };

        let failure_policy = match get("RELAY_FAILURE_POLICY") {
            Some(p) => FailurePolicy::parse(&p)?,
            None => FailurePolicy::AbortOnAnyFailure,
        };

        let image_url = get("TARGET_IMAGE_URL");
        let actions = parse_actions(
            get("RELAY_ACTIONS").as_deref().unwrap_or("update_profile"),
            &get,
            image_url,
        )?;

        let scopes = get("RELAY_SCOPES")
            .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>());

        let defaults = PollConfig::default();
        let media_poll = PollConfig {
            max_attempts: parse_positive(&get, "MEDIA_POLL_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay_ms: parse_num(&get, "MEDIA_POLL_BASE_DELAY_MS", defaults.base_delay_ms)?,
            max_delay_ms: parse_num(&get, "MEDIA_POLL_MAX_DELAY_MS", defaults.max_delay_ms)?,
            jitter: defaults.jitter,
        };

        let engage = match get("ENGAGE_TARGET_USER_ID") {
            Some(target_user_id) => Some(EngageConfig {
                target_user_id,
                interval: Duration::from_secs(parse_positive(
                    &get,
                    "ENGAGE_INTERVAL_SECS",
                    DEFAULT_ENGAGE_INTERVAL_SECS,
                )?),
            }),
            None => None,
        };

        let fallback = Endpoints::default();
        let endpoints = Endpoints {
            authorize_url: get("X_AUTHORIZE_URL").unwrap_or(fallback.authorize_url),
            token_url: get("X_TOKEN_URL").unwrap_or(fallback.token_url),
            api_base: trim_base(get("X_API_BASE").unwrap_or(fallback.api_base)),
            upload_base: trim_base(get("X_UPLOAD_BASE").unwrap_or(fallback.upload_base)),
            oauth1_base: trim_base(get("X_OAUTH1_BASE").unwrap_or(fallback.oauth1_base)),
        };

        Ok(Self {
            bind: get("RELAY_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            protocol,
            client_id: get("X_CLIENT_ID"),
            client_secret: get("X_CLIENT_SECRET"),
            api_key: get("X_API_KEY"),
            api_secret: get("X_API_SECRET"),
            access_token: get("X_ACCESS_TOKEN"),
            access_token_secret: get("X_ACCESS_TOKEN_SECRET"),
            callback_url: get("CALLBACK_URL"),
            scopes,
            actions,
            failure_policy,
            session_ttl_secs: parse_positive(&get, "SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
            http_timeout: Duration::from_secs(parse_positive(
                &get,
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            media_poll,
            engage,
            endpoints,
        })
    }

    /// Scopes to request: the explicit override, or the union the actions need
    pub fn scopes(&self) -> Vec<String> {
        if let Some(scopes) = &self.scopes {
            return scopes.clone();
        }

        let mut scopes: Vec<&str> = vec!["tweet.read", "users.read", "offline.access"];
        for action in &self.actions {
            for scope in action.required_scopes() {
                if !scopes.contains(scope) {
                    scopes.push(*scope);
                }
            }
        }
        if self.engage.is_some() {
            for scope in ["like.write", "tweet.write"] {
                if !scopes.contains(&scope) {
                    scopes.push(scope);
                }
            }
        }
        scopes.into_iter().map(str::to_string).collect()
    }

    /// Credentials the OAuth 2.0 initiator cannot work without
    pub fn require_oauth2(&self) -> Result<(&str, &str), RelayError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| RelayError::MissingCredentials("X_CLIENT_ID is not set".into()))?;
        let callback = self.require_callback()?;
        Ok((client_id, callback))
    }

    /// Credentials the OAuth 1.0a initiator cannot work without
    pub fn require_oauth1(&self) -> Result<(&str, &str, &str), RelayError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RelayError::MissingCredentials("X_API_KEY is not set".into()))?;
        let secret = self
            .api_secret
            .as_deref()
            .ok_or_else(|| RelayError::MissingCredentials("X_API_SECRET is not set".into()))?;
        let callback = self.require_callback()?;
        Ok((key, secret, callback))
    }

    /// Whether the no-login mode has an access token pair to sign with
    pub fn has_preauthorized_token(&self) -> bool {
        self.access_token.is_some() && self.access_token_secret.is_some()
    }

    /// Consumer credentials plus the preconfigured access token
    pub fn require_preauthorized(&self) -> Result<OAuth1Credentials, RelayError> {
        match (
            &self.api_key,
            &self.api_secret,
            &self.access_token,
            &self.access_token_secret,
        ) {
            (Some(key), Some(secret), Some(token), Some(token_secret)) => Ok(OAuth1Credentials {
                consumer_key: key.clone(),
                consumer_secret: secret.clone(),
                token: token.clone(),
                token_secret: token_secret.clone(),
            }),
            _ => {
                let missing: Vec<&str> = [
                    ("X_API_KEY", &self.api_key),
                    ("X_API_SECRET", &self.api_secret),
                    ("X_ACCESS_TOKEN", &self.access_token),
                    ("X_ACCESS_TOKEN_SECRET", &self.access_token_secret),
                ]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(key, _)| key)
                .collect();
                Err(RelayError::MissingCredentials(format!(
                    "{} not set",
                    missing.join(", ")
                )))
            }
        }
    }

    fn require_callback(&self) -> Result<&str, RelayError> {
        self.callback_url
            .as_deref()
            .ok_or_else(|| RelayError::MissingCredentials("CALLBACK_URL is not set".into()))
    }
}

fn parse_actions<G>(
    list: &str,
    get: &G,
    image_url: Option<String>,
) -> Result<Vec<DownstreamAction>>
where
    G: Fn(&str) -> Option<String>,
{
    let mut actions = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let action = match name {
            "update_profile" => {
                let field = match get("PROFILE_FIELD") {
                    Some(f) => ProfileField::parse(&f)?,
                    None => ProfileField::Description,
                };
                let value = get("PROFILE_VALUE")
                    .ok_or_else(|| anyhow!("update_profile requires PROFILE_VALUE"))?;
                DownstreamAction::UpdateProfile { field, value }
            }
            "update_avatar" => DownstreamAction::UpdateAvatar {
                image_url: image_url
                    .clone()
                    .ok_or_else(|| anyhow!("update_avatar requires TARGET_IMAGE_URL"))?,
            },
            "post_tweet" => {
                let text =
                    get("TWEET_TEXT").ok_or_else(|| anyhow!("post_tweet requires TWEET_TEXT"))?;
                if text.chars().count() > MAX_TWEET_CHARS {
                    bail!("TWEET_TEXT exceeds {} characters", MAX_TWEET_CHARS);
                }
                DownstreamAction::PostTweet {
                    text,
                    image_url: image_url.clone(),
                }
            }
            other => bail!(
                "Unknown action '{}' in RELAY_ACTIONS. Valid values: update_profile, update_avatar, post_tweet",
                other
            ),
        };
        actions.push(action);
    }

    if actions.is_empty() {
        bail!("RELAY_ACTIONS must name at least one action");
    }
    Ok(actions)
}

fn parse_num<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", key, raw)),
        None => Ok(default),
    }
}

/// Like `parse_num`, but zero and negative values fail startup
fn parse_positive<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = parse_num(get, key, default)?;
    if value <= T::default() {
        bail!("{} must be greater than zero", key);
    }
    Ok(value)
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}
