//! Lookup kinds, records, and error classification
//!
//! Two independent enrichment sources are supported: a GeoIP service and an
//! RDAP registry service. Each kind has its own URL template, its own cache
//! file, and its own rule for recovering the address from a response
//! payload (see [`crate::enrich::aggregate`]).

pub mod client;

pub use client::{HttpLookupClient, LookupClient};

/// Structured response payload from one lookup for one address
///
/// Stored verbatim; nothing beyond address recovery interprets the fields.
pub type LookupRecord = serde_json::Value;

/// The enrichment source a lookup is issued against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LookupKind {
    /// Geolocation lookup (json.geoiplookup.io)
    Geo,
    /// Registry/RDAP lookup (rdap.arin.net)
    Rdap,
}

impl LookupKind {
    /// Both lookup kinds, in canonical order
    pub fn all() -> &'static [LookupKind] {
        &[LookupKind::Geo, LookupKind::Rdap]
    }

    /// Default base URL of the service behind this kind
    pub fn base_url(&self) -> &'static str {
        match self {
            LookupKind::Geo => "https://json.geoiplookup.io",
            LookupKind::Rdap => "https://rdap.arin.net/registry/ip",
        }
    }

    /// Build the request URL for `addr` against the default service
    pub fn url(&self, addr: &crate::address::Address) -> String {
        format!("{}/{addr}", self.base_url())
    }

    /// Conventional name of the on-disk cache file for this kind
    pub fn cache_file_name(&self) -> &'static str {
        match self {
            LookupKind::Geo => "cached_geoip.json",
            LookupKind::Rdap => "cached_rdap.json",
        }
    }

    /// Short human-readable label used in status output and logs
    pub fn label(&self) -> &'static str {
        match self {
            LookupKind::Geo => "geoip",
            LookupKind::Rdap => "rdap",
        }
    }
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classified failure of a single lookup attempt
///
/// Lookups never panic or raise past the client boundary; every failure mode
/// maps onto one of these variants.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The request exceeded the fixed per-request timeout
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established or was dropped
    #[error("connection failed: {0}")]
    Connection(String),

    /// The service answered with a non-200 status
    #[error("unexpected status {status} from {url}")]
    Status {
        /// HTTP status code received
        status: u16,
        /// URL the request was issued against
        url: String,
    },

    /// The body was not parseable, or a well-formed body reported failure
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl LookupError {
    /// True for connection-level failures worth retrying
    ///
    /// Non-200 statuses and malformed payloads are answers, not transport
    /// glitches, and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, LookupError::Timeout | LookupError::Connection(_))
    }
}
