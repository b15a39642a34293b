//! Binary envelope and compressed text values.
//!
//! Every binary payload (data models and hybrid node shells) is sealed as:
//!
//! ```text
//! [0..2]  magic 0xF0 0x1C
//! [2]     envelope version
//! [3]     payload kind
//! [4]     flags (bit 0 = LZ4 block)
//! [5..9]  uncompressed length, u32 LE
//! [9..]   body
//! ```
//!
//! The header is validated before anything is inflated. Declared lengths
//! above the configured limit, or above what the body could expand to, are
//! refused without allocating.

use folio_core::{CacheSettings, CodecError};
use std::fmt;
use std::sync::{Arc, OnceLock};

pub const MAGIC: [u8; 2] = [0xF0, 0x1C];
pub const ENVELOPE_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 9;

const FLAG_LZ4: u8 = 0b0000_0001;

/// LZ4 output never exceeds input by more than this factor.
const MAX_LZ4_RATIO: usize = 255;

/// Hard cap on a single lazily compressed property value.
pub const MAX_INFLATED_TEXT_BYTES: usize = 64 * 1024 * 1024;

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    DataModel = 1,
    Node = 2,
}

impl PayloadKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PayloadKind::DataModel),
            2 => Some(PayloadKind::Node),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeOptions {
    /// Bodies shorter than this are stored uncompressed.
    pub compression_threshold: usize,
    /// Largest uncompressed body accepted on either side.
    pub max_payload_bytes: usize,
}

impl Default for EnvelopeOptions {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl EnvelopeOptions {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            compression_threshold: settings.compression.envelope_threshold_bytes,
            max_payload_bytes: settings.max_payload_bytes,
        }
    }
}

fn inflation_bound(compressed_len: usize) -> usize {
    compressed_len
        .saturating_mul(MAX_LZ4_RATIO)
        .saturating_add(16)
}

/// Wrap `body` in an envelope, compressing when it pays off.
pub fn seal(kind: PayloadKind, body: &[u8], options: &EnvelopeOptions) -> Result<Vec<u8>, CodecError> {
    if body.len() > options.max_payload_bytes {
        return Err(CodecError::fault(format!(
            "encoded body of {} bytes exceeds the {} byte limit",
            body.len(),
            options.max_payload_bytes
        )));
    }
    let declared = u32::try_from(body.len()).map_err(CodecError::fault)?;

    let compressed = if body.len() >= options.compression_threshold {
        let block = lz4_flex::block::compress(body);
        (block.len() < body.len()).then_some(block)
    } else {
        None
    };

    let (flags, payload) = match &compressed {
        Some(block) => (FLAG_LZ4, block.as_slice()),
        None => (0, body),
    };

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.push(ENVELOPE_VERSION);
    out.push(kind as u8);
    out.push(flags);
    out.extend_from_slice(&declared.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Validate an envelope and return its uncompressed body.
pub fn open(kind: PayloadKind, bytes: &[u8], options: &EnvelopeOptions) -> Result<Vec<u8>, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::corrupt(format!(
            "envelope of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    if bytes[0..2] != MAGIC {
        return Err(CodecError::corrupt("missing envelope magic"));
    }
    if bytes[2] != ENVELOPE_VERSION {
        return Err(CodecError::corrupt(format!(
            "unsupported envelope version {}",
            bytes[2]
        )));
    }
    match PayloadKind::from_byte(bytes[3]) {
        Some(found) if found == kind => {}
        Some(found) => {
            return Err(CodecError::corrupt(format!(
                "expected {kind:?} envelope, found {found:?}"
            )))
        }
        None => {
            return Err(CodecError::corrupt(format!(
                "unknown payload kind {}",
                bytes[3]
            )))
        }
    }
    let flags = bytes[4];
    if flags & !FLAG_LZ4 != 0 {
        return Err(CodecError::corrupt(format!("unknown envelope flags {flags:#04x}")));
    }

    let declared = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
    if declared > options.max_payload_bytes {
        return Err(CodecError::PayloadTooLarge {
            declared,
            limit: options.max_payload_bytes,
        });
    }

    let body = &bytes[HEADER_LEN..];
    if flags & FLAG_LZ4 == 0 {
        if body.len() != declared {
            return Err(CodecError::corrupt(format!(
                "declared {declared} bytes, body has {}",
                body.len()
            )));
        }
        return Ok(body.to_vec());
    }

    if declared > inflation_bound(body.len()) {
        return Err(CodecError::corrupt(format!(
            "declared {declared} bytes cannot come from a {} byte block",
            body.len()
        )));
    }
    let inflated = lz4_flex::block::decompress(body, declared).map_err(CodecError::corrupt)?;
    if inflated.len() != declared {
        return Err(CodecError::corrupt(format!(
            "block inflated to {} bytes, header declared {declared}",
            inflated.len()
        )));
    }
    Ok(inflated)
}

// ============================================================================
// LAZY TEXT
// ============================================================================

/// Text stored as a size-prefixed LZ4 block, inflated on first read.
#[derive(Clone)]
pub struct LazyText {
    compressed: Arc<[u8]>,
    inflated: OnceLock<Result<Arc<str>, CodecError>>,
}

impl LazyText {
    /// Compress `text`. The plain text stays cached on this instance.
    pub fn compress(text: &str) -> Self {
        Self {
            compressed: lz4_flex::compress_prepend_size(text.as_bytes()).into(),
            inflated: OnceLock::from(Ok(Arc::from(text))),
        }
    }

    /// Wrap stored bytes without inflating them.
    pub fn from_compressed(bytes: Vec<u8>) -> Self {
        Self {
            compressed: bytes.into(),
            inflated: OnceLock::new(),
        }
    }

    pub fn compressed(&self) -> &[u8] {
        &self.compressed
    }

    pub fn is_inflated(&self) -> bool {
        self.inflated.get().is_some()
    }

    /// The text, inflating it on first call.
    pub fn text(&self) -> Result<&str, CodecError> {
        self.inflated
            .get_or_init(|| inflate_text(&self.compressed))
            .as_deref()
            .map_err(Clone::clone)
    }
}

fn inflate_text(bytes: &[u8]) -> Result<Arc<str>, CodecError> {
    let Some(prefix) = bytes.get(0..4) else {
        return Err(CodecError::corrupt("compressed value is missing its length prefix"));
    };
    let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if declared > MAX_INFLATED_TEXT_BYTES {
        return Err(CodecError::PayloadTooLarge {
            declared,
            limit: MAX_INFLATED_TEXT_BYTES,
        });
    }
    if declared > inflation_bound(bytes.len() - 4) {
        return Err(CodecError::corrupt(format!(
            "compressed value declares {declared} bytes from a {} byte block",
            bytes.len() - 4
        )));
    }
    let raw = lz4_flex::decompress_size_prepended(bytes).map_err(CodecError::corrupt)?;
    let text = String::from_utf8(raw).map_err(CodecError::corrupt)?;
    Ok(Arc::from(text))
}

impl PartialEq for LazyText {
    fn eq(&self, other: &Self) -> bool {
        self.compressed == other.compressed
    }
}

impl fmt::Debug for LazyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyText")
            .field("compressed_len", &self.compressed.len())
            .field("inflated", &self.is_inflated())
            .finish()
    }
}
