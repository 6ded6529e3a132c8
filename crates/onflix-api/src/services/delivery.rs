//! Signed stream URLs and playback tokens.
//!
//! A token is `base64url(json claims) + "." + base64url(hmac-sha256)`. The
//! CDN edge verifies the same format, so the claim names stay short.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use url::Url;

use onflix_models::VideoQuality;

use crate::error::{ApiError, ApiResult};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a stream token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamClaims {
    /// Content ID.
    pub cid: String,
    /// User ID.
    pub uid: String,
    /// Quality, absent for playback tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// Expiry (Unix seconds).
    pub exp: i64,
}

impl StreamClaims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// A signed artifact and when it stops working.
#[derive(Debug, Clone, Serialize)]
pub struct SignedStream {
    pub url: Option<String>,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct StreamSigner {
    secret: String,
    cdn_base: Url,
    url_expiry: Duration,
    token_expiry: Duration,
}

impl StreamSigner {
    pub fn new(
        secret: impl Into<String>,
        cdn_base_url: &str,
        url_expiry: Duration,
        token_expiry: Duration,
    ) -> Result<Self, url::ParseError> {
        let mut cdn_base = Url::parse(cdn_base_url)?;
        // Relative joins must keep the last path segment
        if !cdn_base.path().ends_with('/') {
            let path = format!("{}/", cdn_base.path());
            cdn_base.set_path(&path);
        }
        Ok(Self {
            secret: secret.into(),
            cdn_base,
            url_expiry,
            token_expiry,
        })
    }

    fn mac(&self) -> ApiResult<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ApiError::internal(format!("Invalid stream signing key: {}", e)))
    }

    pub fn sign(&self, claims: &StreamClaims) -> ApiResult<String> {
        let json = serde_json::to_vec(claims)
            .map_err(|e| ApiError::internal(format!("Failed to encode stream claims: {}", e)))?;
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Claims of a valid, unexpired token. Tampered or malformed tokens yield `None`.
    pub fn verify(&self, signed: &str, now: DateTime<Utc>) -> ApiResult<Option<StreamClaims>> {
        let Some((payload, sig_encoded)) = signed.split_once('.') else {
            return Ok(None);
        };
        let Ok(sig_bytes) = URL_SAFE_NO_PAD.decode(sig_encoded) else {
            return Ok(None);
        };

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        if mac.verify_slice(&sig_bytes).is_err() {
            return Ok(None);
        }

        let claims: Option<StreamClaims> = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        Ok(claims.filter(|c| !c.is_expired(now)))
    }

    /// Resolve a video file against the CDN and attach a short-lived token.
    ///
    /// Absolute file URLs are kept as they are; relative paths are joined
    /// onto the CDN base.
    pub fn streaming_url(
        &self,
        file_url: &str,
        content_id: &str,
        user_id: &str,
        quality: VideoQuality,
        now: DateTime<Utc>,
    ) -> ApiResult<SignedStream> {
        let expires_at = now + chrono::Duration::from_std(self.url_expiry).unwrap_or_default();
        let token = self.sign(&StreamClaims {
            cid: content_id.to_string(),
            uid: user_id.to_string(),
            q: Some(quality.as_str().to_string()),
            exp: expires_at.timestamp(),
        })?;

        let mut url = match Url::parse(file_url) {
            Ok(absolute) => absolute,
            Err(_) => self
                .cdn_base
                .join(file_url.trim_start_matches('/'))
                .map_err(|e| ApiError::internal(format!("Invalid video path {}: {}", file_url, e)))?,
        };
        url.query_pairs_mut().append_pair("token", &token);

        Ok(SignedStream {
            url: Some(url.into()),
            token,
            expires_at,
        })
    }

    /// Longer-lived token a player presents to the CDN for a whole session.
    pub fn playback_token(
        &self,
        content_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ApiResult<SignedStream> {
        let expires_at = now + chrono::Duration::from_std(self.token_expiry).unwrap_or_default();
        let token = self.sign(&StreamClaims {
            cid: content_id.to_string(),
            uid: user_id.to_string(),
            q: None,
            exp: expires_at.timestamp(),
        })?;

        Ok(SignedStream {
            url: None,
            token,
            expires_at,
        })
    }
}
