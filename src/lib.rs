//! ipscout - IPv4 extraction and enrichment
//!
//! This library extracts IPv4 addresses from arbitrary text, deduplicates
//! them, and enriches each unique address against two independent lookup
//! services (GeoIP and RDAP), with a persistent per-service cache so
//! repeated runs avoid redundant network calls.

pub mod address;
pub mod cache;
pub mod enrich;
pub mod lookup;

// Re-export core types for library users
pub use address::{extract_addresses, Address, AddressParseError, AddressSet};
pub use cache::{CacheError, LookupCache};
pub use enrich::{EnrichConfig, EnrichError, Enricher, ResultAggregator, ResultMap};
pub use lookup::{HttpLookupClient, LookupClient, LookupError, LookupKind, LookupRecord};
