//! ============================================================================
//! Media Upload - Chunked INIT / APPEND / FINALIZE / STATUS
//! ============================================================================
//! The upload endpoint processes media asynchronously. After FINALIZE the
//! media id is only usable once processing reports `succeeded`, so the
//! uploader polls STATUS with bounded exponential backoff and reports a
//! processing failure and a poll timeout as different errors.
//! ============================================================================

use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::twitter::{Image, TwitterApi};
use crate::auth::Credentials;
use crate::poll::next_delay;
use crate::types::{MediaUpload, RelayError, RelayResult};

/// Largest APPEND segment the endpoint accepts
const MAX_SEGMENT_BYTES: usize = 5 * 1024 * 1024;

/// Uploads one image on behalf of the authorizing account
pub struct MediaUploader<'a> {
    api: &'a TwitterApi,
    creds: &'a Credentials,
}

impl<'a> MediaUploader<'a> {
    pub fn new(api: &'a TwitterApi, creds: &'a Credentials) -> Self {
        Self { api, creds }
    }

    fn endpoint(&self) -> String {
        format!("{}/1.1/media/upload.json", self.api.upload_base)
    }

    /// Run the full upload and wait for processing to finish
    pub async fn upload(&self, image: &Image) -> RelayResult<MediaUpload> {
        let media_id = self.init(image).await?;
        info!("Media {} initialised ({} bytes)", media_id, image.bytes.len());

        for (index, chunk) in image.bytes.chunks(MAX_SEGMENT_BYTES).enumerate() {
            self.append(&media_id, index, chunk, &image.media_type).await?;
        }

        let finalized = self.finalize(&media_id).await?;
        self.await_processing(&media_id, finalized.processing_info)
            .await?;

        info!("Media {} ready", media_id);
        Ok(MediaUpload { media_id })
    }

    async fn init(&self, image: &Image) -> RelayResult<String> {
        let url = self.endpoint();
        let total = image.bytes.len().to_string();
        let form = [
            ("command", "INIT"),
            ("total_bytes", total.as_str()),
            ("media_type", image.media_type.as_str()),
            ("media_category", "tweet_image"),
        ];
        let request = self
            .api
            .client
            .post(&url)
            .header(AUTHORIZATION, self.creds.authorization("POST", &url, &form))
            .form(&form);

        let response = self.api.send("media_init", request).await?;
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| RelayError::invalid("media_init", e))?;
        body.media_id_string
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::invalid("media_init", "response carried no media_id_string"))
    }

    async fn append(
        &self,
        media_id: &str,
        index: usize,
        chunk: &[u8],
        media_type: &str,
    ) -> RelayResult<()> {
        debug!("Appending segment {} ({} bytes) to media {}", index, chunk.len(), media_id);

        let url = self.endpoint();
        let part = Part::bytes(chunk.to_vec())
            .file_name("media")
            .mime_str(media_type)
            .map_err(|e| RelayError::invalid("media_append", e))?;
        let form = Form::new()
            .text("command", "APPEND")
            .text("media_id", media_id.to_string())
            .text("segment_index", index.to_string())
            .part("media", part);

        // Multipart bodies are not covered by OAuth 1.0a signatures
        let request = self
            .api
            .client
            .post(&url)
            .header(AUTHORIZATION, self.creds.authorization("POST", &url, &[]))
            .multipart(form);

        self.api.send("media_append", request).await?;
        Ok(())
    }

    async fn finalize(&self, media_id: &str) -> RelayResult<UploadResponse> {
        let url = self.endpoint();
        let form = [("command", "FINALIZE"), ("media_id", media_id)];
        let request = self
            .api
            .client
            .post(&url)
            .header(AUTHORIZATION, self.creds.authorization("POST", &url, &form))
            .form(&form);

        let response = self.api.send("media_finalize", request).await?;
        response
            .json()
            .await
            .map_err(|e| RelayError::invalid("media_finalize", e))
    }

    async fn status(&self, media_id: &str) -> RelayResult<UploadResponse> {
        let url = self.endpoint();
        let query = [("command", "STATUS"), ("media_id", media_id)];
        let request = self
            .api
            .client
            .get(&url)
            .header(AUTHORIZATION, self.creds.authorization("GET", &url, &query))
            .query(&query);

        let response = self.api.send("media_status", request).await?;
        response
            .json()
            .await
            .map_err(|e| RelayError::invalid("media_status", e))
    }

    /// Poll STATUS until processing settles or the attempt budget runs out
    async fn await_processing(
        &self,
        media_id: &str,
        mut info: Option<ProcessingInfo>,
    ) -> RelayResult<()> {
        let config = &self.api.media_poll;
        let mut attempt = 0;

        loop {
            let Some(current) = info.take() else {
                // No processing_info means the media is usable right away
                return Ok(());
            };

            match current.state.as_str() {
                "succeeded" => return Ok(()),
                "failed" => {
                    let reason = current
                        .error
                        .map(|e| format!("{}: {}", e.name.unwrap_or_default(), e.message.unwrap_or_default()))
                        .unwrap_or_else(|| "unknown processing error".to_string());
                    warn!("Media {} processing failed: {}", media_id, reason);
                    return Err(RelayError::MediaProcessingFailed {
                        media_id: media_id.to_string(),
                        reason,
                    });
                }
                state => {
                    if attempt >= config.max_attempts {
                        warn!("Media {} still {} after {} checks", media_id, state, attempt);
                        return Err(RelayError::MediaProcessingTimeout {
                            media_id: media_id.to_string(),
                            attempts: attempt,
                        });
                    }

                    let delay = next_delay(attempt, current.check_after_secs, config);
                    debug!(
                        "Media {} {} ({}%), checking again in {:?}",
                        media_id,
                        state,
                        current.progress_percent.unwrap_or(0),
                        delay
                    );
                    sleep(delay).await;

                    info = self.status(media_id).await?.processing_info;
                    attempt += 1;
                }
            }
        }
    }
}

// ============================================================================
// Upload API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct UploadResponse {
    media_id_string: Option<String>,
    processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct ProcessingInfo {
    state: String,
    check_after_secs: Option<u64>,
    progress_percent: Option<u32>,
    error: Option<ProcessingError>,
}

#[derive(Debug, Deserialize)]
struct ProcessingError {
    name: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollConfig;
    use crate::testing::{RecordedRequest, StubResponse, StubServer};
    use crate::types::AccessToken;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn creds() -> Credentials {
        Credentials::Bearer(AccessToken {
            value: "tok".into(),
            refresh_token: None,
            scope: None,
            expires_at: None,
        })
    }

    fn fast_poll(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
        }
    }

    fn image() -> Image {
        Image {
            bytes: vec![1, 2, 3, 4],
            media_type: "image/png".into(),
        }
    }

    fn command(req: &RecordedRequest) -> String {
        if let Some(cmd) = req.query.get("command") {
            return cmd.clone();
        }
        for cmd in ["INIT", "APPEND", "FINALIZE"] {
            if req.body.contains(cmd) {
                return cmd.to_string();
            }
        }
        String::new()
    }

    /// Stub whose STATUS answers `in_progress` until `ready_after` checks
    fn upload_stub(ready_after: u32, final_state: &'static str) -> StubServer {
        let checks = Arc::new(AtomicU32::new(0));
        StubServer::start(move |req| match command(req).as_str() {
            "INIT" => StubResponse::json(202, r#"{"media_id_string":"555"}"#),
            "APPEND" => StubResponse::empty(204),
            "FINALIZE" => StubResponse::json(
                201,
                r#"{"media_id_string":"555","processing_info":{"state":"pending","check_after_secs":0}}"#,
            ),
            "STATUS" => {
                let n = checks.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= ready_after {
                    StubResponse::json(
                        200,
                        &format!(
                            r#"{{"media_id_string":"555","processing_info":{{"state":"{}","error":{{"name":"InvalidMedia","message":"Unsupported"}}}}}}"#,
                            final_state
                        ),
                    )
                } else {
                    StubResponse::json(
                        200,
                        r#"{"media_id_string":"555","processing_info":{"state":"in_progress","progress_percent":40}}"#,
                    )
                }
            }
            _ => StubResponse::empty(400),
        })
    }

    fn api(stub: &StubServer, poll: PollConfig) -> TwitterApi {
        TwitterApi::new(reqwest::Client::new(), stub.base(), stub.base(), poll)
    }

    #[tokio::test]
    async fn test_upload_waits_for_processing() {
        let stub = upload_stub(2, "succeeded");
        let api = api(&stub, fast_poll(5));
        let creds = creds();

        let media = MediaUploader::new(&api, &creds).upload(&image()).await.unwrap();
        assert_eq!(media.media_id, "555");

        let commands: Vec<String> = stub.requests().iter().map(command).collect();
        assert_eq!(commands, vec!["INIT", "APPEND", "FINALIZE", "STATUS", "STATUS"]);
        for req in stub.requests() {
            assert_eq!(req.path, "/1.1/media/upload.json");
            assert_eq!(req.header("authorization").as_deref(), Some("Bearer tok"));
        }
    }

    #[tokio::test]
    async fn test_processing_failure() {
        let stub = upload_stub(1, "failed");
        let api = api(&stub, fast_poll(5));
        let creds = creds();

        match MediaUploader::new(&api, &creds).upload(&image()).await {
            Err(RelayError::MediaProcessingFailed { media_id, reason }) => {
                assert_eq!(media_id, "555");
                assert!(reason.contains("InvalidMedia"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_processing_timeout() {
        let stub = upload_stub(u32::MAX, "succeeded");
        let api = api(&stub, fast_poll(3));
        let creds = creds();

        match MediaUploader::new(&api, &creds).upload(&image()).await {
            Err(RelayError::MediaProcessingTimeout { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {:?}", other),
        }
        let statuses = stub
            .requests()
            .iter()
            .filter(|r| command(r) == "STATUS")
            .count();
        assert_eq!(statuses, 3);
    }

    #[tokio::test]
    async fn test_init_without_media_id_stops_upload() {
        let stub = StubServer::start(|_| StubResponse::json(202, "{}"));
        let api = api(&stub, fast_poll(5));
        let creds = creds();

        let err = MediaUploader::new(&api, &creds)
            .upload(&image())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidResponse { step: "media_init", .. }));

        let commands: Vec<String> = stub.requests().iter().map(command).collect();
        assert_eq!(commands, vec!["INIT"]);
    }

    #[tokio::test]
    async fn test_init_failure_stops_upload() {
        let stub = StubServer::start(|_| StubResponse::json(400, r#"{"errors":[{"message":"bad"}]}"#));
        let api = api(&stub, fast_poll(3));
        let creds = creds();

        let err = MediaUploader::new(&api, &creds).upload(&image()).await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream { step: "media_init", status: 400, .. }));
        assert_eq!(stub.requests().len(), 1);
    }
}
