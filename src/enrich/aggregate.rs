//! Result aggregation and per-kind address recovery
//!
//! The two services embed the looked-up address differently in their
//! payloads, so the key a record is stored under is always *recovered* from
//! the record itself rather than taken from the request. That keeps the
//! result mapping honest if a service answers about a related but different
//! address.

use crate::address::{extract_addresses, Address};
use crate::lookup::{LookupKind, LookupRecord};
use std::collections::HashMap;

/// Result mapping for one lookup kind: recovered address → record
pub type ResultMap = HashMap<Address, LookupRecord>;

/// Why no address could be recovered from a record
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The expected field is missing or not a string
    #[error("record has no usable {field} field")]
    MissingField {
        /// Name of the field that was expected
        field: &'static str,
    },

    /// The field was present but contained no dotted-quad pattern
    #[error("no address pattern found in {field}")]
    NoMatch {
        /// Name of the field that was scanned
        field: &'static str,
    },
}

/// Recover the address a record describes, using the rule for `kind`
///
/// - Geo records carry an explicit `ip` field.
/// - RDAP records embed the address in the first `links` entry's `value`
///   URL; it is recovered with the same pattern used for input text,
///   taking the first match.
pub fn recover_address(kind: LookupKind, record: &LookupRecord) -> Result<Address, RecoveryError> {
    match kind {
        LookupKind::Geo => {
            let ip = record
                .get("ip")
                .and_then(|v| v.as_str())
                .ok_or(RecoveryError::MissingField { field: "ip" })?;
            ip.parse()
                .map_err(|_| RecoveryError::NoMatch { field: "ip" })
        }
        LookupKind::Rdap => {
            let value = record
                .get("links")
                .and_then(|v| v.get(0))
                .and_then(|link| link.get("value"))
                .and_then(|v| v.as_str())
                .ok_or(RecoveryError::MissingField {
                    field: "links[0].value",
                })?;
            extract_addresses(value)
                .into_iter()
                .next()
                .ok_or(RecoveryError::NoMatch {
                    field: "links[0].value",
                })
        }
    }
}

/// Accumulates successful records for one lookup kind
///
/// Records whose address cannot be recovered are discarded with a logged
/// diagnostic rather than stored under a guessed key.
#[derive(Debug)]
pub struct ResultAggregator {
    kind: LookupKind,
    results: ResultMap,
}

impl ResultAggregator {
    /// Create an empty aggregator for `kind`
    pub fn new(kind: LookupKind) -> Self {
        Self {
            kind,
            results: ResultMap::new(),
        }
    }

    /// Absorb one record, returning the recovered key if it was stored
    pub fn absorb(&mut self, record: LookupRecord) -> Option<Address> {
        match recover_address(self.kind, &record) {
            Ok(addr) => {
                self.results.entry(addr.clone()).or_insert(record);
                Some(addr)
            }
            Err(e) => {
                tracing::warn!(kind = %self.kind, "discarding {} record: {e}", self.kind);
                None
            }
        }
    }

    /// Merge cache-held entries in; already-absorbed addresses keep theirs
    pub fn merge_cached(&mut self, cached: ResultMap) {
        for (addr, record) in cached {
            self.results.entry(addr).or_insert(record);
        }
    }

    /// Number of records stored so far
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True if nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Consume the aggregator, yielding the result mapping
    pub fn into_map(self) -> ResultMap {
        self.results
    }
}
