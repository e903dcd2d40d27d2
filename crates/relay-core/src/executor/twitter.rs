//! ============================================================================
//! Twitter Executor - Authenticated Calls Against the X REST API
//! ============================================================================
//! Every call carries the flow's credentials:
//! - Read the authorizing account
//! - Update profile fields and avatar
//! - Post tweets (optionally with uploaded media)
//! - Read a timeline, like and retweet (engagement job)
//! ============================================================================

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{header::AUTHORIZATION, Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::actions::ProfileField;
use crate::auth::Credentials;
use crate::poll::PollConfig;
use crate::types::{RelayError, RelayResult, TweetResult, UserProfile};

/// Timeline page size when there is no previous tweet to anchor on
const INITIAL_TIMELINE_PAGE: &str = "5";
/// Timeline page size when reading everything after `since_id`
const FOLLOW_UP_TIMELINE_PAGE: &str = "100";
const MAX_TIMELINE_PAGES: usize = 10;

/// A downloaded image ready for upload
#[derive(Debug, Clone)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Minimal view of a tweet from a timeline read
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TweetSummary {
    pub id: String,
    #[serde(default)]
    pub text: String,
}

/// Client for the X REST API
#[derive(Clone)]
pub struct TwitterApi {
    pub(crate) client: Client,
    pub(crate) api_base: String,
    pub(crate) upload_base: String,
    pub(crate) media_poll: PollConfig,
}

impl TwitterApi {
    pub fn new(
        client: Client,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
        media_poll: PollConfig,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            upload_base: upload_base.into(),
            media_poll,
        }
    }

    /// Send a request, turning transport errors and non-2xx statuses into
    /// `RelayError`s that carry the upstream body
    pub(crate) async fn send(
        &self,
        step: &'static str,
        request: RequestBuilder,
    ) -> RelayResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RelayError::network(step, e))?;

        if !response.status().is_success() {
            return Err(RelayError::from_response(step, response).await);
        }
        Ok(response)
    }

    /// Read the authorizing account
    pub async fn me(&self, creds: &Credentials) -> RelayResult<UserProfile> {
        let url = format!("{}/2/users/me", self.api_base);
        let request = self
            .client
            .get(&url)
            .header(AUTHORIZATION, creds.authorization("GET", &url, &[]));

        let response = self.send("read_profile", request).await?;
        let body: DataEnvelope<UserProfile> = response
            .json()
            .await
            .map_err(|e| RelayError::invalid("read_profile", e))?;

        debug!("Authorized as @{} ({})", body.data.username, body.data.id);
        Ok(body.data)
    }

    /// Overwrite one profile field
    pub async fn update_profile(
        &self,
        creds: &Credentials,
        field: ProfileField,
        value: &str,
    ) -> RelayResult<()> {
        info!("Updating profile {} field", field.as_str());

        let url = format!("{}/1.1/account/update_profile.json", self.api_base);
        let form = [(field.as_str(), value)];
        let request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, creds.authorization("POST", &url, &form))
            .form(&form);

        self.send("update_profile", request).await?;
        Ok(())
    }

    /// Replace the profile image
    pub async fn update_avatar(&self, creds: &Credentials, image: &Image) -> RelayResult<()> {
        info!("Updating profile image ({} bytes)", image.bytes.len());

        let url = format!("{}/1.1/account/update_profile_image.json", self.api_base);
        let encoded = STANDARD.encode(&image.bytes);
        let form = [("image", encoded.as_str())];
        let request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, creds.authorization("POST", &url, &form))
            .form(&form);

        self.send("update_avatar", request).await?;
        Ok(())
    }

    /// Post a single tweet, attaching already processed media
    pub async fn post_tweet(
        &self,
        creds: &Credentials,
        text: &str,
        media_ids: &[String],
    ) -> RelayResult<TweetResult> {
        info!("Posting tweet: {}...", text.chars().take(50).collect::<String>());

        let mut body = serde_json::json!({
            "text": text
        });
        if !media_ids.is_empty() {
            body["media"] = serde_json::json!({
                "media_ids": media_ids
            });
        }

        let url = format!("{}/2/tweets", self.api_base);
        let request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, creds.authorization("POST", &url, &[]))
            .json(&body);

        let response = self.send("post_tweet", request).await?;
        let created: DataEnvelope<CreatedTweet> = response
            .json()
            .await
            .map_err(|e| RelayError::invalid("post_tweet", e))?;

        let tweet_id = created.data.id;
        let url = format!("https://twitter.com/i/status/{}", tweet_id);
        info!("Tweet posted: {}", url);

        Ok(TweetResult { tweet_id, url })
    }

    /// Tweets by `user_id`, newest first.
    ///
    /// Without `since_id` only the latest page of `INITIAL_TIMELINE_PAGE`
    /// tweets is read. With it, every page newer than `since_id` is followed
    /// through `next_token`, up to `MAX_TIMELINE_PAGES`.
    pub async fn user_tweets(
        &self,
        creds: &Credentials,
        user_id: &str,
        since_id: Option<&str>,
    ) -> RelayResult<Vec<TweetSummary>> {
        let url = format!("{}/2/users/{}/tweets", self.api_base, user_id);
        let mut tweets = Vec::new();
        let mut next_token: Option<String> = None;

        for page in 0..MAX_TIMELINE_PAGES {
            let request = {
                let mut query: Vec<(&str, &str)> = Vec::new();
                match since_id {
                    Some(since) => {
                        query.push(("max_results", FOLLOW_UP_TIMELINE_PAGE));
                        query.push(("since_id", since));
                    }
                    None => query.push(("max_results", INITIAL_TIMELINE_PAGE)),
                }
                if let Some(token) = next_token.as_deref() {
                    query.push(("pagination_token", token));
                }
                self.client
                    .get(&url)
                    .header(AUTHORIZATION, creds.authorization("GET", &url, &query))
                    .query(&query)
            };

            let response = self.send("user_tweets", request).await?;
            let timeline: Timeline = response
                .json()
                .await
                .map_err(|e| RelayError::invalid("user_tweets", e))?;
            tweets.extend(timeline.data.unwrap_or_default());

            next_token = timeline.meta.and_then(|m| m.next_token);
            if since_id.is_none() || next_token.is_none() {
                return Ok(tweets);
            }
            if page + 1 == MAX_TIMELINE_PAGES {
                warn!(
                    "Timeline of {} has more than {} pages of new tweets, older ones skipped",
                    user_id, MAX_TIMELINE_PAGES
                );
            }
        }
        Ok(tweets)
    }

    pub async fn like(&self, creds: &Credentials, me: &str, tweet_id: &str) -> RelayResult<()> {
        let url = format!("{}/2/users/{}/likes", self.api_base, me);
        self.post_tweet_ref("like", &url, creds, tweet_id).await
    }

    pub async fn retweet(&self, creds: &Credentials, me: &str, tweet_id: &str) -> RelayResult<()> {
        let url = format!("{}/2/users/{}/retweets", self.api_base, me);
        self.post_tweet_ref("retweet", &url, creds, tweet_id).await
    }

    async fn post_tweet_ref(
        &self,
        step: &'static str,
        url: &str,
        creds: &Credentials,
        tweet_id: &str,
    ) -> RelayResult<()> {
        debug!("{} tweet {}", step, tweet_id);
        let request = self
            .client
            .post(url)
            .header(AUTHORIZATION, creds.authorization("POST", url, &[]))
            .json(&serde_json::json!({ "tweet_id": tweet_id }));
        self.send(step, request).await?;
        Ok(())
    }

    /// Download an image from a public URL (no credentials attached)
    pub async fn fetch_image(&self, image_url: &str) -> RelayResult<Image> {
        debug!("Fetching image {}", image_url);
        let response = self.send("fetch_image", self.client.get(image_url)).await?;

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::network("fetch_image", e))?;
        if bytes.is_empty() {
            return Err(RelayError::invalid("fetch_image", "image is empty"));
        }

        Ok(Image {
            bytes: bytes.to_vec(),
            media_type,
        })
    }
}

// ============================================================================
// X API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    data: Option<Vec<TweetSummary>>,
    meta: Option<TimelineMeta>,
}

#[derive(Debug, Deserialize)]
struct TimelineMeta {
    next_token: Option<String>,
}
