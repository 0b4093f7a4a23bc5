//! Challenge-response authentication.
//!
//! The client asks the verification service for a nonce, signs its UTF-8 bytes
//! with the identity's signing key, and trades the signature for a bearer
//! token. Private keys never leave the device; only the AID, the display name,
//! and the two public keys are sent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use anonfly_common::helpers::normalize_server_url;
use anonfly_common::{
    ChallengeRequest, ChallengeResponse, Error, Result, VerifyRequest, VerifyResponse,
};
use anonfly_crypto::Identity;

use crate::session::{Session, SessionCache};

/// Server-side trust anchor: issues nonces and verifies signatures.
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Fetch a fresh nonce for `aid`.
    async fn challenge(&self, aid: &str) -> Result<String>;

    /// Submit the signed nonce; returns the minted token on success.
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse>;
}

/// [`VerificationService`] over HTTP JSON.
#[derive(Debug, Clone)]
pub struct HttpVerificationService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVerificationService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::config)?;
        Ok(Self {
            client,
            base_url: normalize_server_url(Some(base_url.to_string())),
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: serde::Serialize + Sync,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(Error::connectivity)?;

        if !res.status().is_success() {
            let status = res.status();
            let body: serde_json::Value = res.json().await.unwrap_or_default();
            let message = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("request rejected");
            return Err(Error::auth(format!("{path}: {status}: {message}")));
        }

        res.json::<Resp>()
            .await
            .map_err(|e| Error::protocol(format!("{path}: malformed response: {e}")))
    }
}

#[async_trait]
impl VerificationService for HttpVerificationService {
    async fn challenge(&self, aid: &str) -> Result<String> {
        let body = ChallengeRequest {
            aid: aid.to_string(),
        };
        let resp: ChallengeResponse = self.post("/auth/challenge", &body).await?;
        Ok(resp.nonce)
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse> {
        self.post("/auth/verify", request).await
    }
}

/// Every handshake failure collapses into this single error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("failed to establish session")]
    SessionFailed,
}

/// Turns an [`Identity`] into a [`Session`]. No automatic retry.
#[derive(Clone)]
pub struct HandshakeClient {
    service: Arc<dyn VerificationService>,
    sessions: SessionCache,
}

impl HandshakeClient {
    pub fn new(service: Arc<dyn VerificationService>, sessions: SessionCache) -> Self {
        Self { service, sessions }
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Run challenge, sign, verify; cache and return the session.
    pub async fn establish(
        &self,
        identity: &Identity,
    ) -> std::result::Result<Session, HandshakeError> {
        match self.try_establish(identity).await {
            Ok(session) => {
                info!("Session established for {}", session.aid);
                self.sessions.set(session.clone());
                Ok(session)
            }
            Err(e) => {
                warn!("Handshake for {} failed: {}", identity.aid(), e);
                Err(HandshakeError::SessionFailed)
            }
        }
    }

    async fn try_establish(&self, identity: &Identity) -> Result<Session> {
        let aid = identity.aid().as_str();
        let nonce = self.service.challenge(aid).await?;
        debug!("Received challenge for {}", aid);

        let request = VerifyRequest {
            aid: aid.to_string(),
            signature: identity.sign_base64(nonce.as_bytes()),
            username: identity.display_name().to_string(),
            identity_public_key: identity.signing_public_spki(),
            exchange_public_key: identity.exchange_public_spki(),
        };
        let response = self.service.verify(&request).await?;

        if !response.aid.eq_ignore_ascii_case(aid) {
            return Err(Error::auth(format!(
                "server confirmed {} instead of {}",
                response.aid, aid
            )));
        }
        if response.token.is_empty() {
            return Err(Error::protocol("empty session token"));
        }

        Ok(Session {
            aid: aid.to_string(),
            display_name: response.username,
            token: response.token,
        })
    }
}
