//! Session-scoped fingerprint index
//!
//! An item's identity is the SHA-256 of its text and author, so two authors
//! posting the same short text ("Great!") stay distinct.

use crate::model::{Item, RawItem};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Content fingerprint of an item
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Derive the fingerprint of an item from its text and author
pub fn identity(item: &Item) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(item.text.as_bytes());
    // unit separator keeps ("ab", "c") and ("a", "bc") apart
    hasher.update([0x1f]);
    hasher.update(item.author.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Fingerprint of an entry that failed validation, so it is counted once per session
pub fn raw_identity(raw: &RawItem) -> Fingerprint {
    let mut hasher = Sha256::new();
    for field in [&raw.text, &raw.author] {
        match field {
            Some(value) => {
                hasher.update([1]);
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0]),
        }
        hasher.update([0x1f]);
    }
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Set of fingerprints seen during one harvesting session
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    seen: HashSet<Fingerprint>,
}

impl FingerprintIndex {
    pub fn seen(&self, fp: &Fingerprint) -> bool {
        self.seen.contains(fp)
    }

    pub fn record(&mut self, fp: Fingerprint) {
        self.seen.insert(fp);
    }
}
