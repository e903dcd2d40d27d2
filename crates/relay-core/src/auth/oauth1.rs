//! ============================================================================
//! OAuth 1.0a Three-Legged Flow (RFC 5849)
//! ============================================================================
//! HMAC-SHA1 request signing plus the request-token -> authenticate ->
//! access-token exchange. The signature covers every oauth_* parameter and
//! every query/form parameter of the request; JSON and multipart bodies are
//! not part of it.
//! ============================================================================

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::Rng;
use reqwest::Client;
use sha1::Sha1;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info};

use crate::types::{RelayError, RelayResult};

type HmacSha1 = Hmac<Sha1>;

/// RFC 5849 section 3.6: everything but unreserved characters is encoded
const RFC5849: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Consumer + access token pair used to sign API calls
#[derive(Debug, Clone)]
pub struct OAuth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: String,
    pub token_secret: String,
}

/// Temporary credentials returned by the request_token step
#[derive(Debug, Clone)]
pub struct RequestToken {
    pub token: String,
    pub token_secret: String,
}

/// Access token plus the identity the provider attaches to it
#[derive(Debug, Clone)]
pub struct AccessTokenGrant {
    pub token: String,
    pub token_secret: String,
    pub user_id: Option<String>,
    pub screen_name: Option<String>,
}

pub fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, RFC5849).to_string()
}

fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}

/// Base64 HMAC-SHA1 over the signature base string
pub fn signature(
    method: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    consumer_secret: &str,
    token_secret: &str,
) -> String {
    // Sort on encoded pairs, which is what the RFC normalises on
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    );
    let signing_key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );

    let Ok(mut mac) = HmacSha1::new_from_slice(signing_key.as_bytes()) else {
        unreachable!("HMAC accepts keys of any length")
    };
    mac.update(base_string.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Signs requests for one consumer (application)
#[derive(Debug, Clone)]
pub struct Signer {
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl Signer {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        }
    }

    /// `Authorization` header for a request. `token` is None only for the
    /// request_token step. Extra parameters prefixed `oauth_` also go in the
    /// header; the rest are signed but sent by the caller in query or form.
    pub fn authorization(
        &self,
        method: &str,
        url: &str,
        token: Option<(&str, &str)>,
        extra: &[(&str, &str)],
    ) -> String {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_with(method, url, token, extra, &generate_nonce(), &timestamp)
    }

    fn authorization_with(
        &self,
        method: &str,
        url: &str,
        token: Option<(&str, &str)>,
        extra: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> String {
        let mut oauth: BTreeMap<String, String> = BTreeMap::new();
        oauth.insert("oauth_consumer_key".into(), self.consumer_key.clone());
        oauth.insert("oauth_nonce".into(), nonce.to_string());
        oauth.insert("oauth_signature_method".into(), "HMAC-SHA1".into());
        oauth.insert("oauth_timestamp".into(), timestamp.to_string());
        oauth.insert("oauth_version".into(), "1.0".into());
        if let Some((token, _)) = token {
            oauth.insert("oauth_token".into(), token.to_string());
        }
        for (k, v) in extra.iter().filter(|(k, _)| k.starts_with("oauth_")) {
            oauth.insert(k.to_string(), v.to_string());
        }

        let mut signed = oauth.clone();
        for (k, v) in extra {
            signed.insert(k.to_string(), v.to_string());
        }

        let token_secret = token.map(|(_, secret)| secret).unwrap_or("");
        let sig = signature(method, url, &signed, &self.consumer_secret, token_secret);
        oauth.insert("oauth_signature".into(), sig);

        let fields = oauth
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {}", fields)
    }
}

/// Step 1: obtain a request token bound to our callback
pub async fn request_token(
    client: &Client,
    signer: &Signer,
    oauth1_base: &str,
    callback_url: &str,
) -> RelayResult<RequestToken> {
    let url = format!("{}/oauth/request_token", oauth1_base);
    let auth = signer.authorization("POST", &url, None, &[("oauth_callback", callback_url)]);

    let body = post_signed(client, &url, &auth, "request_token").await?;
    let params = parse_form(&body);

    if params.get("oauth_callback_confirmed").map(String::as_str) == Some("false") {
        return Err(RelayError::invalid("request_token", "callback not confirmed"));
    }

    info!("Obtained OAuth 1.0a request token");
    Ok(RequestToken {
        token: required(&params, "oauth_token", "request_token")?,
        token_secret: required(&params, "oauth_token_secret", "request_token")?,
    })
}

/// Step 2: where to send the browser
pub fn authenticate_url(oauth1_base: &str, request_token: &str) -> String {
    format!(
        "{}/oauth/authenticate?oauth_token={}",
        oauth1_base,
        percent_encode(request_token)
    )
}

/// Step 3: trade request token + verifier for an access token
pub async fn access_token(
    client: &Client,
    signer: &Signer,
    oauth1_base: &str,
    request: &RequestToken,
    verifier: &str,
) -> RelayResult<AccessTokenGrant> {
    let url = format!("{}/oauth/access_token", oauth1_base);
    let auth = signer.authorization(
        "POST",
        &url,
        Some((&request.token, &request.token_secret)),
        &[("oauth_verifier", verifier)],
    );

    let body = post_signed(client, &url, &auth, "access_token").await?;
    let params = parse_form(&body);

    info!("Obtained OAuth 1.0a access token");
    Ok(AccessTokenGrant {
        token: required(&params, "oauth_token", "access_token")?,
        token_secret: required(&params, "oauth_token_secret", "access_token")?,
        user_id: params.get("user_id").cloned(),
        screen_name: params.get("screen_name").cloned(),
    })
}

async fn post_signed(
    client: &Client,
    url: &str,
    auth: &str,
    step: &'static str,
) -> RelayResult<String> {
    debug!("POST {} ({})", url, step);
    let response = client
        .post(url)
        .header(reqwest::header::AUTHORIZATION, auth)
        .send()
        .await
        .map_err(|e| RelayError::network(step, e))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!("{} failed: {} - {}", step, status, body);
        return Err(RelayError::TokenExchange { status, body });
    }

    response.text().await.map_err(|e| RelayError::network(step, e))
}

fn parse_form(body: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(body.trim().as_bytes())
        .into_owned()
        .collect()
}

fn required(
    params: &HashMap<String, String>,
    key: &str,
    step: &'static str,
) -> RelayResult<String> {
    params
        .get(key)
        .cloned()
        .ok_or_else(|| RelayError::invalid(step, format!("missing {}", key)))
}
