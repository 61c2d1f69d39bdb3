//! IPv4 address extraction from raw text

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Dotted-quad pattern used for both extraction and validation.
///
/// Deliberately looser than `Ipv4Addr`: octets are 1-3 digits with no range
/// check and no normalization, so addresses are kept exactly as they appear
/// in the input text.
const ADDRESS_PATTERN: &str = r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}";

static SCAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(ADDRESS_PATTERN).expect("address pattern is valid"));

static FULL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^{ADDRESS_PATTERN}$")).expect("address pattern is valid")
});

/// Error returned when a string is not a dotted-quad address
#[derive(Debug, Clone, thiserror::Error)]
#[error("not a dotted-quad address: {0:?}")]
pub struct AddressParseError(pub String);

/// A candidate IPv4 address extracted from text
///
/// Equality is case-sensitive string equality on the extracted form; an
/// `Address` is immutable once constructed and is not guaranteed to be a
/// reachable (or even range-valid) host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// View the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if FULL_RE.is_match(&value) {
            Ok(Address(value))
        } else {
            Err(AddressParseError(value))
        }
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::try_from(s.to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract every dotted-quad substring from `text`
///
/// Matches are returned in order of first appearance with duplicates
/// preserved positionally. Use [`AddressSet::from_text`] for the
/// deduplicated working set.
pub fn extract_addresses(text: &str) -> Vec<Address> {
    SCAN_RE
        .find_iter(text)
        .map(|m| Address(m.as_str().to_string()))
        .collect()
}

/// A deduplicated, order-preserving set of extracted addresses
///
/// Built once per input text and immutable afterwards. Iteration order is
/// the order of each address's first appearance in the source text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    addrs: Vec<Address>,
}

impl AddressSet {
    /// Extract and deduplicate all addresses found in `text`
    pub fn from_text(text: &str) -> Self {
        Self::from_addresses(extract_addresses(text))
    }

    /// Build a set from already-extracted addresses, keeping first occurrences
    pub fn from_addresses(addrs: impl IntoIterator<Item = Address>) -> Self {
        let mut seen = HashSet::new();
        let addrs = addrs
            .into_iter()
            .filter(|a| seen.insert(a.clone()))
            .collect();
        Self { addrs }
    }

    /// Iterate the addresses in first-appearance order
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.addrs.iter()
    }

    /// The addresses as a slice, in first-appearance order
    pub fn as_slice(&self) -> &[Address] {
        &self.addrs
    }

    /// Number of unique addresses
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// True if no addresses were found
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

impl<'a> IntoIterator for &'a AddressSet {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.addrs.iter()
    }
}
