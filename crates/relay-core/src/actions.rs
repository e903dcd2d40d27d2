//! ============================================================================
//! Downstream Actions - What the Relay Does With a Fresh Token
//! ============================================================================
//! One parameterised flow instead of a copy per variant: the configured list
//! of actions runs in order under an explicit failure policy.
//! ============================================================================

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use crate::auth::Credentials;
use crate::executor::{MediaUploader, TwitterApi};
use crate::types::{RelayError, RelayResult, UserProfile};

/// Longest status text accepted by the tweet endpoint
pub const MAX_TWEET_CHARS: usize = 280;

/// Profile field overwritten by `UpdateProfile`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Description,
    Location,
    Name,
    Url,
}

impl ProfileField {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "description" | "bio" => Ok(Self::Description),
            "location" => Ok(Self::Location),
            "name" => Ok(Self::Name),
            "url" => Ok(Self::Url),
            other => bail!(
                "Unknown PROFILE_FIELD '{}'. Valid values: description, location, name, url",
                other
            ),
        }
    }

    /// Form parameter name on `account/update_profile`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Location => "location",
            Self::Name => "name",
            Self::Url => "url",
        }
    }
}

/// A write performed against the authorizing account
#[derive(Debug, Clone, PartialEq)]
pub enum DownstreamAction {
    UpdateProfile { field: ProfileField, value: String },
    UpdateAvatar { image_url: String },
    PostTweet { text: String, image_url: Option<String> },
}

impl DownstreamAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateProfile { .. } => "update_profile",
            Self::UpdateAvatar { .. } => "update_avatar",
            Self::PostTweet { .. } => "post_tweet",
        }
    }

    /// OAuth 2.0 scopes this action needs on top of the base set
    pub fn required_scopes(&self) -> &'static [&'static str] {
        match self {
            Self::UpdateProfile { .. } | Self::UpdateAvatar { .. } => &[],
            Self::PostTweet {
                image_url: Some(_), ..
            } => &["tweet.write", "media.write"],
            Self::PostTweet { image_url: None, .. } => &["tweet.write"],
        }
    }

    /// Run the action. Steps inside an action depend on each other: a
    /// failed image fetch or upload means nothing is posted.
    pub async fn execute(&self, api: &TwitterApi, creds: &Credentials) -> RelayResult<String> {
        match self {
            Self::UpdateProfile { field, value } => {
                api.update_profile(creds, *field, value).await?;
                Ok(format!("Profile {} set to \"{}\"", field.as_str(), value))
            }
            Self::UpdateAvatar { image_url } => {
                let image = api.fetch_image(image_url).await?;
                api.update_avatar(creds, &image).await?;
                Ok("Profile image updated".to_string())
            }
            Self::PostTweet { text, image_url } => {
                let mut media_ids = Vec::new();
                if let Some(image_url) = image_url {
                    let image = api.fetch_image(image_url).await?;
                    let media = MediaUploader::new(api, creds).upload(&image).await?;
                    media_ids.push(media.media_id);
                }
                let tweet = api.post_tweet(creds, text, &media_ids).await?;
                Ok(format!("Posted {}", tweet.url))
            }
        }
    }
}

/// What to do when one of several actions fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failed action and render a failure page
    AbortOnAnyFailure,
    /// Run every action and report each outcome
    BestEffort,
}

impl FailurePolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "abort-on-any-failure" | "abort" => Ok(Self::AbortOnAnyFailure),
            "best-effort" => Ok(Self::BestEffort),
            other => bail!(
                "Unknown RELAY_FAILURE_POLICY '{}'. Valid values: abort-on-any-failure, best-effort",
                other
            ),
        }
    }
}

/// Outcome of one action
#[derive(Debug, Clone)]
pub enum OutcomeStatus {
    Done(String),
    Failed(RelayError),
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: &'static str,
    pub status: OutcomeStatus,
}

/// Everything a completed callback did
#[derive(Debug, Clone)]
pub struct FlowReport {
    pub user: UserProfile,
    pub outcomes: Vec<ActionOutcome>,
}

impl FlowReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Done(_)))
            .count()
    }

    pub fn first_error(&self) -> Option<&RelayError> {
        self.outcomes.iter().find_map(|o| match &o.status {
            OutcomeStatus::Failed(err) => Some(err),
            OutcomeStatus::Done(_) => None,
        })
    }
}

/// Run the configured actions in order under `policy`
pub async fn run_actions(
    api: &TwitterApi,
    creds: &Credentials,
    user: UserProfile,
    actions: &[DownstreamAction],
    policy: FailurePolicy,
) -> RelayResult<FlowReport> {
    let mut outcomes = Vec::with_capacity(actions.len());

    for (i, action) in actions.iter().enumerate() {
        info!("Running action {}/{}: {}", i + 1, actions.len(), action.name());

        match action.execute(api, creds).await {
            Ok(summary) => outcomes.push(ActionOutcome {
                action: action.name(),
                status: OutcomeStatus::Done(summary),
            }),
            Err(err) => {
                error!("Action {} failed: {}", action.name(), err);
                if policy == FailurePolicy::AbortOnAnyFailure {
                    if i + 1 < actions.len() {
                        warn!("Skipping {} remaining actions", actions.len() - i - 1);
                    }
                    return Err(err);
                }
                outcomes.push(ActionOutcome {
                    action: action.name(),
                    status: OutcomeStatus::Failed(err),
                });
            }
        }
    }

    Ok(FlowReport { user, outcomes })
}
