//! Snapshot normalization
//!
//! A snapshot is the comparable form of one fetch cycle: every script body in
//! resolver order, each behind an ordinal marker, with no capture time. The
//! presentable form written to history adds a `Last updated` header; it is
//! derived on demand and must never be compared.

use chrono::{DateTime, Local};

const PRESENTABLE_PREFIX: &[u8] = b"/* Last updated: ";
const HEADER_END: &[u8] = b"\n\n";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    blob: Vec<u8>,
    scripts: usize,
}

impl Snapshot {
    /// Combine script bodies into one deterministic blob.
    pub fn normalize<I, B>(bodies: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut blob = Vec::new();
        let mut scripts = 0;
        for (i, body) in bodies.into_iter().enumerate() {
            blob.extend_from_slice(format!("/* JS File #{} */\n", i + 1).as_bytes());
            blob.extend_from_slice(body.as_ref());
            blob.extend_from_slice(b"\n\n");
            scripts += 1;
        }
        Self { blob, scripts }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    pub fn len(&self) -> usize {
        self.blob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts == 0
    }

    pub fn script_count(&self) -> usize {
        self.scripts
    }

    /// The artifact stored for humans: a timestamp header, a blank line, then the blob.
    pub fn presentable(&self, at: DateTime<Local>) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.blob.len() + 48);
        out.extend_from_slice(PRESENTABLE_PREFIX);
        out.extend_from_slice(at.format("%Y-%m-%d %H:%M:%S").to_string().as_bytes());
        out.extend_from_slice(b" */");
        out.extend_from_slice(HEADER_END);
        out.extend_from_slice(&self.blob);
        out
    }

    /// Recover the comparable blob from a stored presentable artifact.
    /// Returns `None` if the input does not carry the header.
    pub fn strip_presentable_header(stored: &[u8]) -> Option<&[u8]> {
        if !stored.starts_with(PRESENTABLE_PREFIX) {
            return None;
        }
        let end = stored
            .windows(HEADER_END.len())
            .position(|w| w == HEADER_END)?;
        Some(&stored[end + HEADER_END.len()..])
    }

    /// True if a stored presentable artifact holds exactly this snapshot.
    pub fn matches_presentable(&self, stored: &[u8]) -> bool {
        Self::strip_presentable_header(stored) == Some(self.blob.as_slice())
    }
}
