//! Page encoding: a JSON array of events, gzip-compressed.
//!
//! Every encoded page comes with a [`PageManifest`] describing the
//! uncompressed JSON. Decoding checks that the content matches the page
//! name, and optionally a manifest, before any event is trusted.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use super::{PageBatch, PageName};
use crate::error::{CoreError, Result};
use crate::event::Event;

/// Summary of a page's uncompressed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageManifest {
    pub name: PageName,
    pub event_count: u64,
    /// Length of the uncompressed JSON.
    pub byte_len: u64,
    /// `blake3:<hex>` of the uncompressed JSON.
    pub digest: String,
}

impl PageManifest {
    /// Parse a stored manifest.
    ///
    /// # Errors
    ///
    /// Returns an encoding error for bad JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Gzip-compress JSON bytes.
///
/// # Errors
///
/// Returns an I/O error if compression fails.
pub fn gzip(json: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json)?;
    Ok(encoder.finish()?)
}

/// Inflate gzip bytes.
///
/// # Errors
///
/// Returns an I/O error if the bytes are not valid gzip.
pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Encode `events` as page `name`.
///
/// # Errors
///
/// Returns [`CoreError::CorruptPage`] if the events do not span exactly
/// `name`, or an encoding error.
pub fn encode_page(name: &PageName, events: &[Event]) -> Result<(Vec<u8>, PageManifest)> {
    check_bounds(name, events)?;
    let json = serde_json::to_vec(events)?;
    let manifest = PageManifest {
        name: *name,
        event_count: events.len() as u64,
        byte_len: json.len() as u64,
        digest: digest(&json),
    };
    Ok((gzip(&json)?, manifest))
}

/// Decode page `name` from its archived bytes.
///
/// # Errors
///
/// Returns [`CoreError::CorruptPage`] if the bytes are not gzip JSON, the
/// events are unordered, or they do not span exactly `name`.
pub fn decode_page(name: &PageName, bytes: &[u8]) -> Result<PageBatch> {
    decode_inner(name, bytes).map(|(batch, _)| batch)
}

/// [`decode_page`], additionally verifying the content against `manifest`.
///
/// # Errors
///
/// Returns [`CoreError::CorruptPage`] on any mismatch.
pub fn decode_verified(manifest: &PageManifest, bytes: &[u8]) -> Result<PageBatch> {
    let (batch, json) = decode_inner(&manifest.name, bytes)?;
    let actual = digest(&json);
    if actual != manifest.digest || batch.events().len() as u64 != manifest.event_count {
        return Err(corrupt(
            &manifest.name,
            format!("content digest {actual} does not match manifest {}", manifest.digest),
        ));
    }
    Ok(batch)
}

fn decode_inner(name: &PageName, bytes: &[u8]) -> Result<(PageBatch, Vec<u8>)> {
    let json = gunzip(bytes).map_err(|err| corrupt(name, format!("not gzip: {err}")))?;
    let events: Vec<Event> =
        serde_json::from_slice(&json).map_err(|err| corrupt(name, format!("not a JSON event array: {err}")))?;
    check_bounds(name, &events)?;
    let batch = PageBatch::new(events).map_err(|err| corrupt(name, err.to_string()))?;
    Ok((batch, json))
}

fn check_bounds(name: &PageName, events: &[Event]) -> Result<()> {
    let (Some(first), Some(last)) = (events.first(), events.last()) else {
        return Err(corrupt(name, "page is empty".into()));
    };
    let spans = first.id == name.first_id
        && first.timestamp == name.first_ts
        && last.id == name.last_id
        && last.timestamp == name.last_ts;
    if !spans {
        return Err(corrupt(
            name,
            format!("events span {}..{} instead", first.id, last.id),
        ));
    }
    Ok(())
}

fn digest(json: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(json).to_hex())
}

fn corrupt(name: &PageName, reason: String) -> CoreError {
    CoreError::CorruptPage {
        name: name.to_string(),
        reason,
    }
}
