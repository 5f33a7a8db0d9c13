//! Decode-only SentencePiece `.model` reader.
//!
//! Reads the piece table out of a serialized `ModelProto` (protobuf wire
//! format: the `pieces` entries live in field 1, each carrying the piece
//! string in its own field 1). Only decoding is supported; scores, merge
//! rules, and trainer state are skipped over. Token ID = index in the table.

use std::fs;
use std::path::Path;

use crate::error::{Result, RunnerError};

#[derive(Debug)]
pub struct SentencePieceModel {
    pieces: Vec<String>,
}

impl SentencePieceModel {
    /// Load the piece table from a `.model` file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| {
            RunnerError::Tokenizer(format!("Failed to read tokenizer.model: {e}"))
        })?;
        let pieces = parse_model_proto(&data)
            .map_err(|e| RunnerError::Tokenizer(format!("Failed to parse tokenizer.model: {e}")))?;
        if pieces.is_empty() {
            return Err(RunnerError::Tokenizer(
                "tokenizer.model contains no pieces.".to_string(),
            ));
        }
        log::info!("Loaded {} pieces from {:?}", pieces.len(), path);
        Ok(Self { pieces })
    }

    /// Decode token IDs into raw text.
    ///
    /// Out-of-range IDs are skipped; byte-fallback pieces like `<0x41>` are
    /// accumulated as raw bytes. Word-boundary markers and sentinel pieces
    /// are left in place for the shared text normalization pass.
    pub fn decode(&self, token_ids: &[i64]) -> String {
        let mut bytes: Vec<u8> = Vec::new();
        for &id in token_ids {
            let Some(piece) = usize::try_from(id).ok().and_then(|i| self.pieces.get(i)) else {
                continue;
            };
            if let Some(byte) = parse_byte_piece(piece) {
                bytes.push(byte);
            } else {
                bytes.extend_from_slice(piece.as_bytes());
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}

/// Parse a byte-fallback piece like `<0x41>` into its byte value.
fn parse_byte_piece(piece: &str) -> Option<u8> {
    if piece.len() == 6 && piece.starts_with("<0x") && piece.ends_with('>') {
        u8::from_str_radix(&piece[3..5], 16).ok()
    } else {
        None
    }
}

/// Extract the ordered piece strings from a serialized `ModelProto`.
fn parse_model_proto(data: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut pieces = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let (key, next) = read_varint(data, offset)?;
        offset = next;
        let field = key >> 3;
        let wire = (key & 0x7) as u8;
        if field == 1 && wire == 2 {
            let (len, next) = read_varint(data, offset)?;
            offset = next;
            let end = offset
                .checked_add(len as usize)
                .filter(|&e| e <= data.len())
                .ok_or("truncated piece entry")?;
            pieces.push(parse_piece(&data[offset..end])?);
            offset = end;
        } else {
            offset = skip_field(data, offset, wire)?;
        }
    }
    Ok(pieces)
}

/// Pull the piece string (field 1) out of one `SentencePiece` submessage.
fn parse_piece(data: &[u8]) -> std::result::Result<String, String> {
    let mut offset = 0usize;
    let mut piece = String::new();
    while offset < data.len() {
        let (key, next) = read_varint(data, offset)?;
        offset = next;
        let field = key >> 3;
        let wire = (key & 0x7) as u8;
        if field == 1 && wire == 2 {
            let (len, next) = read_varint(data, offset)?;
            offset = next;
            let end = offset
                .checked_add(len as usize)
                .filter(|&e| e <= data.len())
                .ok_or("truncated piece string")?;
            piece = String::from_utf8_lossy(&data[offset..end]).into_owned();
            offset = end;
        } else {
            offset = skip_field(data, offset, wire)?;
        }
    }
    Ok(piece)
}

fn skip_field(data: &[u8], offset: usize, wire: u8) -> std::result::Result<usize, String> {
    match wire {
        0 => read_varint(data, offset).map(|(_, next)| next),
        1 => checked_advance(data, offset, 8),
        2 => {
            let (len, next) = read_varint(data, offset)?;
            checked_advance(data, next, len as usize)
        }
        5 => checked_advance(data, offset, 4),
        other => Err(format!("unsupported protobuf wire type {other}")),
    }
}

fn checked_advance(data: &[u8], offset: usize, by: usize) -> std::result::Result<usize, String> {
    offset
        .checked_add(by)
        .filter(|&e| e <= data.len())
        .ok_or_else(|| "truncated field".to_string())
}

fn read_varint(data: &[u8], mut offset: usize) -> std::result::Result<(u64, usize), String> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(offset).ok_or("truncated varint")?;
        offset += 1;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, offset));
        }
        shift += 7;
        if shift >= 64 {
            return Err("varint overflow".to_string());
        }
    }
}
