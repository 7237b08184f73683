//! Decoder for the compact vulnerability list written by the image scanner
//!
//! The scanner emits `id:severity` pairs separated by commas, for example
//! `CVE-2024-0001:H,CVE-2024-0002:l`. Severity codes are single letters;
//! see [`VulnerabilitySeverity::from_code`].

use crate::crds::{Vulnerability, VulnerabilitySeverity};
use thiserror::Error;

const ENTRY_SEPARATOR: char = ',';
const FIELD_SEPARATOR: char = ':';

/// An entry that could not be decoded and was skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VulnerabilityDecodeError {
    #[error("entry {index} '{entry}' has no severity component")]
    MissingSeverity { index: usize, entry: String },

    #[error("entry {index} '{entry}' has an empty identifier")]
    EmptyId { index: usize, entry: String },
}

/// Outcome of decoding a vulnerability list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedVulnerabilities {
    /// Successfully decoded entries, in input order
    pub vulnerabilities: Vec<Vulnerability>,
    /// Entries that were skipped
    pub errors: Vec<VulnerabilityDecodeError>,
}

/// Decode a scanner vulnerability list.
///
/// Malformed entries are skipped and reported in
/// [`DecodedVulnerabilities::errors`]; decoding never fails as a whole.
#[must_use]
pub fn decode_vulnerabilities(raw: &str) -> DecodedVulnerabilities {
    let mut decoded = DecodedVulnerabilities::default();
    if raw.is_empty() {
        return decoded;
    }

    for (index, entry) in raw.split(ENTRY_SEPARATOR).enumerate() {
        let mut fields = entry.split(FIELD_SEPARATOR);
        let id = fields.next().unwrap_or_default();

        let Some(code) = fields.next() else {
            decoded.errors.push(VulnerabilityDecodeError::MissingSeverity {
                index,
                entry: entry.to_string(),
            });
            continue;
        };

        if id.is_empty() {
            decoded.errors.push(VulnerabilityDecodeError::EmptyId {
                index,
                entry: entry.to_string(),
            });
            continue;
        }

        decoded.vulnerabilities.push(Vulnerability {
            id: id.to_string(),
            severity: VulnerabilitySeverity::from_code(code),
        });
    }

    decoded
}
