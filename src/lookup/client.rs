//! HTTP lookup client
//!
//! One blocking-from-the-caller's-perspective network round-trip per
//! (address, kind) pair. Success is strictly HTTP 200, plus a payload-level
//! success flag for the Geo kind. Everything else comes back as a classified
//! [`LookupError`].

use super::{LookupError, LookupKind, LookupRecord};
use crate::address::Address;
use async_trait::async_trait;
use std::time::Duration;

/// Fixed per-request timeout
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A client able to fetch one enrichment record for one address
///
/// The trait is the seam that lets the orchestrator be exercised against
/// scripted stand-ins in tests; production code uses [`HttpLookupClient`].
#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Fetch the record for `addr` from the service behind `kind`
    async fn fetch(&self, addr: &Address, kind: LookupKind) -> Result<LookupRecord, LookupError>;
}

/// Lookup client backed by a shared `reqwest::Client`
///
/// Each kind's base URL defaults to the public service but can be pointed
/// elsewhere (a self-hosted mirror, or a local server in tests).
#[derive(Debug, Clone)]
pub struct HttpLookupClient {
    client: reqwest::Client,
    geo_base: String,
    rdap_base: String,
}

impl HttpLookupClient {
    /// Create a client with the default 10-second timeout
    pub fn new() -> Result<Self, LookupError> {
        Self::with_timeout(LOOKUP_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            geo_base: LookupKind::Geo.base_url().to_string(),
            rdap_base: LookupKind::Rdap.base_url().to_string(),
        })
    }

    /// Point one kind's lookups at a different base URL
    pub fn with_base_url(mut self, kind: LookupKind, base: impl Into<String>) -> Self {
        match kind {
            LookupKind::Geo => self.geo_base = base.into(),
            LookupKind::Rdap => self.rdap_base = base.into(),
        }
        self
    }

    fn url_for(&self, kind: LookupKind, addr: &Address) -> String {
        let base = match kind {
            LookupKind::Geo => &self.geo_base,
            LookupKind::Rdap => &self.rdap_base,
        };
        format!("{base}/{addr}")
    }
}

#[async_trait]
impl LookupClient for HttpLookupClient {
    async fn fetch(&self, addr: &Address, kind: LookupKind) -> Result<LookupRecord, LookupError> {
        let url = self.url_for(kind, addr);
        tracing::info!(%addr, %kind, "fetching {kind} record for {addr}");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else {
                LookupError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(LookupError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let record: LookupRecord = response
            .json()
            .await
            .map_err(|e| LookupError::MalformedPayload(e.to_string()))?;

        // The Geo service answers 200 even for addresses it cannot place;
        // the embedded flag is the real success signal.
        if kind == LookupKind::Geo && record.get("success").and_then(|v| v.as_bool()) != Some(true) {
            return Err(LookupError::MalformedPayload(format!(
                "geo lookup reported failure for {addr}"
            )));
        }

        Ok(record)
    }
}
