//! Protocol Version and Negotiation
//!
//! MCP protocol revisions are dated strings of the form `YYYY-MM-DD`, which
//! makes lexicographic comparison equivalent to chronological comparison.
//! The negotiator selects the newest supported revision that is not newer
//! than what the client requested.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::ProtocolError;

/// Protocol version with validation and proper encapsulation
///
/// Represents an MCP protocol revision in the format `YYYY-MM-DD`. The
/// internal string is private so every constructed value is known valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion(String);

/// The 2024-11-05 revision: SSE transport, no batching, no annotations.
pub const V2024_11_05: &str = "2024-11-05";
/// The 2025-03-26 revision: streamable HTTP, batching, annotations, audio.
pub const V2025_03_26: &str = "2025-03-26";
/// The 2025-06-18 revision: elicitation, structured outputs, resource
/// indicators; batching removed again.
pub const V2025_06_18: &str = "2025-06-18";

impl ProtocolVersion {
    /// Create a new protocol version with validation
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidVersion` if the version format is not
    /// `YYYY-MM-DD`.
    pub fn new(version: impl Into<String>) -> Result<Self, ProtocolError> {
        let version = version.into();
        if Self::is_valid_format(&version) {
            Ok(Self(version))
        } else {
            Err(ProtocolError::InvalidVersion(version))
        }
    }

    /// Get the version string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid_format(version: &str) -> bool {
        let bytes = version.as_bytes();
        if bytes.len() != 10 {
            return false;
        }
        bytes[4] == b'-'
            && bytes[7] == b'-'
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..7].iter().all(u8::is_ascii_digit)
            && bytes[8..].iter().all(u8::is_ascii_digit)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Version negotiator over an ordered ladder of supported revisions
///
/// The ladder is ordered newest first. Negotiation returns the first
/// supported entry that is not newer than the client's request; a client
/// older than the whole ladder is pinned to the oldest entry.
#[derive(Debug, Clone)]
pub struct VersionNegotiator {
    /// Supported revisions, newest first
    supported: Vec<ProtocolVersion>,
}

impl VersionNegotiator {
    /// Build a negotiator from an ordered (newest-first) list of versions
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidVersion` if the list is empty or any
    /// entry is malformed.
    pub fn new<I, S>(versions: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let supported = versions
            .into_iter()
            .map(ProtocolVersion::new)
            .collect::<Result<Vec<_>, _>>()?;
        if supported.is_empty() {
            return Err(ProtocolError::InvalidVersion("<empty ladder>".to_string()));
        }
        Ok(Self { supported })
    }

    /// Default ladder covering every revision this server implements
    pub fn with_defaults() -> Self {
        Self {
            supported: vec![
                ProtocolVersion(V2025_06_18.to_string()),
                ProtocolVersion(V2025_03_26.to_string()),
                ProtocolVersion(V2024_11_05.to_string()),
            ],
        }
    }

    /// The supported ladder, newest first
    pub fn supported(&self) -> &[ProtocolVersion] {
        &self.supported
    }

    /// Newest supported revision
    pub fn newest(&self) -> &ProtocolVersion {
        &self.supported[0]
    }

    /// Oldest supported revision
    pub fn oldest(&self) -> &ProtocolVersion {
        &self.supported[self.supported.len() - 1]
    }

    /// Whether the exact revision is in the ladder
    pub fn is_supported(&self, version: &ProtocolVersion) -> bool {
        self.supported.contains(version)
    }

    /// Select the newest supported revision `<=` the client's request.
    ///
    /// Clients requesting something older than the whole ladder are pinned
    /// to the oldest supported revision; the initialize response tells them
    /// what they actually got.
    pub fn negotiate(&self, requested: &ProtocolVersion) -> ProtocolVersion {
        self.supported
            .iter()
            .find(|v| v.as_str() <= requested.as_str())
            .unwrap_or_else(|| self.oldest())
            .clone()
    }

    /// Negotiate from a raw string, tolerating malformed input by pinning
    /// to the oldest supported revision.
    pub fn negotiate_str(&self, requested: &str) -> ProtocolVersion {
        match ProtocolVersion::new(requested) {
            Ok(v) => self.negotiate(&v),
            Err(_) => self.oldest().clone(),
        }
    }
}

impl Default for VersionNegotiator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn negotiator() -> VersionNegotiator {
        VersionNegotiator::with_defaults()
    }

    #[test]
    fn test_version_format_validation() {
        assert!(ProtocolVersion::new("2025-06-18").is_ok());
        assert!(ProtocolVersion::new("2024-11-05").is_ok());
        assert!(ProtocolVersion::new("draft").is_err());
        assert!(ProtocolVersion::new("2025-6-18").is_err());
        assert!(ProtocolVersion::new("2025-06-18x").is_err());
        assert!(ProtocolVersion::new("").is_err());
    }

    #[test]
    fn test_exact_match_on_ladder() {
        for v in [V2024_11_05, V2025_03_26, V2025_06_18] {
            let requested = ProtocolVersion::new(v).unwrap();
            assert_eq!(negotiator().negotiate(&requested), requested);
        }
    }

    #[test]
    fn test_newer_than_ladder_pins_to_newest() {
        let requested = ProtocolVersion::new("2026-01-01").unwrap();
        assert_eq!(negotiator().negotiate(&requested).as_str(), V2025_06_18);
    }

    #[test]
    fn test_older_than_ladder_pins_to_oldest() {
        let requested = ProtocolVersion::new("2024-01-01").unwrap();
        assert_eq!(negotiator().negotiate(&requested).as_str(), V2024_11_05);
    }

    #[test]
    fn test_between_revisions_rounds_down() {
        let requested = ProtocolVersion::new("2025-05-01").unwrap();
        assert_eq!(negotiator().negotiate(&requested).as_str(), V2025_03_26);
    }

    #[test]
    fn test_empty_ladder_rejected() {
        assert!(VersionNegotiator::new(Vec::<String>::new()).is_err());
    }

    proptest! {
        /// negotiate(negotiate(v)) == negotiate(v) for any well-formed date
        #[test]
        fn prop_negotiation_idempotent(y in 2020u32..2030, m in 1u32..13, d in 1u32..29) {
            let requested = ProtocolVersion::new(format!("{y:04}-{m:02}-{d:02}")).unwrap();
            let n = negotiator();
            let once = n.negotiate(&requested);
            let twice = n.negotiate(&once);
            prop_assert_eq!(once, twice);
        }

        /// the negotiated result is always a member of the ladder
        #[test]
        fn prop_negotiation_closed(y in 2020u32..2030, m in 1u32..13, d in 1u32..29) {
            let requested = ProtocolVersion::new(format!("{y:04}-{m:02}-{d:02}")).unwrap();
            let n = negotiator();
            prop_assert!(n.is_supported(&n.negotiate(&requested)));
        }
    }
}
