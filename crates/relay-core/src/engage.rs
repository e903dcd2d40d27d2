//! ============================================================================
//! Engagement Job - Recurring Like/Retweet of a Target Account
//! ============================================================================
//! Runs beside request handling and reads the same in-memory credentials the
//! last successful login left in the `TokenVault`. Nothing is persisted: after
//! a restart the job idles until someone logs in again.
//!
//! The first tick engages with the latest 5 tweets and anchors on the newest;
//! later ticks page through everything posted since (up to 1000 tweets).
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::{Credentials, OAuth2Client};
use crate::executor::TwitterApi;
use crate::types::{RelayResult, UserProfile};

/// Credentials and identity from the most recent completed login
#[derive(Debug, Clone)]
pub struct VaultEntry {
    pub credentials: Credentials,
    pub user: UserProfile,
}

/// Process-wide holder of the latest credentials
#[derive(Clone, Default)]
pub struct TokenVault {
    inner: Arc<RwLock<Option<VaultEntry>>>,
}

impl TokenVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store(&self, entry: VaultEntry) {
        info!("Stored credentials for @{}", entry.user.username);
        *self.inner.write().await = Some(entry);
    }

    pub async fn get(&self) -> Option<VaultEntry> {
        self.inner.read().await.clone()
    }

    /// Swap in refreshed credentials, but only while the vault still holds
    /// the token that was refreshed for the same user. Returns whether the
    /// entry was updated.
    async fn replace_credentials(&self, user_id: &str, stale_token: &str, credentials: Credentials) -> bool {
        let mut guard = self.inner.write().await;
        match guard.as_mut() {
            Some(entry)
                if entry.user.id == user_id
                    && entry.credentials.access_token().map(|t| t.value.as_str()) == Some(stale_token) =>
            {
                entry.credentials = credentials;
                true
            }
            _ => false,
        }
    }
}

/// Likes and retweets new posts from one account on a fixed period
pub struct EngagementJob {
    api: TwitterApi,
    oauth: Option<OAuth2Client>,
    vault: TokenVault,
    target_user_id: String,
    interval: Duration,
    last_seen: Option<String>,
}

impl EngagementJob {
    pub fn new(
        api: TwitterApi,
        oauth: Option<OAuth2Client>,
        vault: TokenVault,
        target_user_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            oauth,
            vault,
            target_user_id: target_user_id.into(),
            interval,
            last_seen: None,
        }
    }

    /// Run forever on the tokio runtime
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Engagement job started for user {} every {:?}",
                self.target_user_id, self.interval
            );
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                match self.tick().await {
                    Ok(0) => debug!("Engagement tick: nothing new"),
                    Ok(n) => info!("Engagement tick: engaged with {} tweets", n),
                    Err(e) => error!("Engagement tick failed: {}", e),
                }
            }
        })
    }

    /// One pass: returns how many tweets were liked and retweeted
    pub async fn tick(&mut self) -> RelayResult<usize> {
        let Some(entry) = self.vault.get().await else {
            debug!("No credentials in vault, skipping engagement");
            return Ok(0);
        };

        let creds = match self.fresh_credentials(&entry.user.id, entry.credentials).await? {
            Some(creds) => creds,
            None => return Ok(0),
        };

        let tweets = self
            .api
            .user_tweets(&creds, &self.target_user_id, self.last_seen.as_deref())
            .await?;
        if let Some(newest) = tweets.first() {
            self.last_seen = Some(newest.id.clone());
        }

        let mut engaged = 0;
        for tweet in &tweets {
            let liked = self.api.like(&creds, &entry.user.id, &tweet.id).await;
            let retweeted = self.api.retweet(&creds, &entry.user.id, &tweet.id).await;
            match (liked, retweeted) {
                (Ok(()), Ok(())) => engaged += 1,
                (like, retweet) => {
                    if let Err(e) = like {
                        warn!("Like of {} failed: {}", tweet.id, e);
                    }
                    if let Err(e) = retweet {
                        warn!("Retweet of {} failed: {}", tweet.id, e);
                    }
                }
            }
        }
        Ok(engaged)
    }

    /// Refresh an expired bearer token when possible. None means the stored
    /// credentials are unusable until the next login.
    async fn fresh_credentials(
        &self,
        user_id: &str,
        creds: Credentials,
    ) -> RelayResult<Option<Credentials>> {
        let Some(token) = creds.access_token() else {
            return Ok(Some(creds));
        };
        if !token.is_expired() {
            return Ok(Some(creds));
        }

        match (&self.oauth, token.refresh_token.as_deref()) {
            (Some(oauth), Some(refresh_token)) => {
                let mut refreshed = oauth.refresh(refresh_token).await?;
                if refreshed.refresh_token.is_none() {
                    refreshed.refresh_token = Some(refresh_token.to_string());
                }
                let creds = Credentials::Bearer(refreshed);
                if self
                    .vault
                    .replace_credentials(user_id, &token.value, creds.clone())
                    .await
                {
                    info!("Engagement job refreshed expired token");
                } else {
                    debug!("Vault changed during refresh, refreshed token used for this tick only");
                }
                Ok(Some(creds))
            }
            _ => {
                warn!("Stored token expired and cannot be refreshed, waiting for a new login");
                Ok(None)
            }
        }
    }
}
