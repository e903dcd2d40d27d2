//! ============================================================================
//! Executor Module - Authenticated Calls on Behalf of the User
//! ============================================================================
//! - TwitterApi: profile, avatar, tweets, timeline, likes, retweets
//! - MediaUploader: chunked media upload with processing poll
//! ============================================================================

mod media;
mod twitter;

pub use media::MediaUploader;
pub use twitter::{Image, TweetSummary, TwitterApi};
