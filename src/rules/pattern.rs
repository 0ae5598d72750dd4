// Mon Jan 26 2026 - Alex

use serde::{Deserialize, Serialize};
use std::fmt;

/// A byte pattern with per-byte wildcard mask, as produced from a hex string
/// like `{ 48 65 ?? 6C }`. `mask[i] == false` means byte `i` matches
/// anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytePattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
}

impl BytePattern {
    pub fn new(bytes: Vec<u8>, mask: Vec<bool>) -> Self {
        assert_eq!(bytes.len(), mask.len(), "pattern bytes and mask must have same length");
        Self { bytes, mask }
    }

    pub fn from_literal(bytes: &[u8]) -> Self {
        Self {
            mask: vec![true; bytes.len()],
            bytes: bytes.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn significant_byte_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// True when the pattern matches at the start of `data`.
    pub fn matches(&self, data: &[u8]) -> bool {
        if data.len() < self.bytes.len() {
            return false;
        }

        self.bytes
            .iter()
            .zip(self.mask.iter())
            .zip(data.iter())
            .all(|((pattern_byte, &significant), &data_byte)| {
                !significant || *pattern_byte == data_byte
            })
    }

    /// All match offsets in ascending order. Overlapping matches are all
    /// reported.
    pub fn find_all_in(&self, data: &[u8]) -> Vec<usize> {
        let mut results = Vec::new();

        if self.bytes.is_empty() || data.len() < self.bytes.len() {
            return results;
        }

        let first_significant = self.mask.iter().position(|&m| m).unwrap_or(0);
        let first_byte = self.bytes[first_significant];
        let all_wild = self.significant_byte_count() == 0;

        for i in 0..=(data.len() - self.bytes.len()) {
            if (all_wild || data[i + first_significant] == first_byte) && self.matches(&data[i..]) {
                results.push(i);
            }
        }

        results
    }

    pub fn to_hex_string(&self) -> String {
        self.bytes
            .iter()
            .zip(self.mask.iter())
            .map(|(b, &m)| {
                if m {
                    format!("{:02X}", b)
                } else {
                    "??".to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {} }}", self.to_hex_string())
    }
}

impl PartialEq for BytePattern {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes && self.mask == other.mask
    }
}

impl Eq for BytePattern {}
