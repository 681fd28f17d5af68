//! Thought signatures.
//!
//! A thought signature is the SHA-256 digest of a canonicalized root-cause
//! hypothesis. It is derived once when the analysis is produced and must be
//! presented again before any remediation runs, which lets the audit trail
//! prove that this exact reasoning authorized this exact action.

use crate::errors::GovernanceViolation;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Hex-encoded SHA-256 digest. Values read back from disk are kept verbatim so
/// that tampered or truncated signatures can still be reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for progress output.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }

    /// Whether this looks like a digest produced by [`SignatureEngine::derive`].
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 64
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize analysis text before hashing: unix line endings, no trailing
/// whitespace per line, no leading or trailing blank lines.
pub fn canonicalize(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.lines().map(str::trim_end).collect();
    lines.join("\n").trim_matches('\n').to_string()
}

/// Derives signatures and remembers which analysis each incident was bound to.
#[derive(Debug, Default)]
pub struct SignatureEngine {
    bindings: HashMap<String, String>,
}

impl SignatureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic digest of the canonicalized analysis text.
    pub fn derive(analysis: &str) -> Signature {
        let mut hasher = Sha256::new();
        hasher.update(canonicalize(analysis).as_bytes());
        Signature(format!("{:x}", hasher.finalize()))
    }

    /// Record `analysis` as the hypothesis of `incident_id` and return its signature.
    pub fn bind(&mut self, incident_id: &str, analysis: &str) -> Signature {
        self.bindings
            .insert(incident_id.to_string(), canonicalize(analysis));
        Self::derive(analysis)
    }

    /// Signature derived from the analysis bound to `incident_id`, if any.
    pub fn expected(&self, incident_id: &str) -> Option<Signature> {
        self.bindings.get(incident_id).map(|a| Self::derive(a))
    }

    /// True only if `signature` equals the one derived from the incident's bound analysis.
    pub fn correlate(&self, signature: &Signature, incident_id: &str) -> bool {
        self.expected(incident_id)
            .is_some_and(|expected| expected == *signature)
    }

    /// [`Self::correlate`] as a `Result`, carrying both signatures on mismatch.
    pub fn check(
        &self,
        signature: &Signature,
        incident_id: &str,
    ) -> Result<(), GovernanceViolation> {
        if self.correlate(signature, incident_id) {
            return Ok(());
        }
        Err(GovernanceViolation {
            incident_id: incident_id.to_string(),
            presented: signature.to_string(),
            expected: self
                .expected(incident_id)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "<no analysis bound>".to_string()),
        })
    }
}
