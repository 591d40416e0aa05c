//! Session identity.
//!
//! Two session configurations that would talk to the same backend as the same
//! identity produce the same [`Fingerprint`]. The digest is a SHA-256 over
//! length-prefixed, tagged fields, so neither field order nor a value
//! containing separator bytes can make two different configurations collide.

use std::fmt;

use sha2::{Digest, Sha256};

/// Stable identity of a session configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Returns the raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the full digest as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the first 8 bytes as hex, for log fields.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Incremental builder feeding tagged fields into the digest.
pub(crate) struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    pub(crate) fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Starts a named section.
    pub(crate) fn tag(&mut self, tag: &str) {
        self.hasher.update([0xFE]);
        self.bytes(tag.as_bytes());
    }

    pub(crate) fn bytes(&mut self, value: &[u8]) {
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
    }

    pub(crate) fn str(&mut self, value: &str) {
        self.bytes(value.as_bytes());
    }

    /// Absent and empty are distinct.
    pub(crate) fn opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(v) => {
                self.hasher.update([1]);
                self.str(v);
            }
            None => self.hasher.update([0]),
        }
    }

    pub(crate) fn bool(&mut self, value: bool) {
        self.hasher.update([u8::from(value)]);
    }

    pub(crate) fn u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    pub(crate) fn u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    pub(crate) fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}
