//! Value encoding
//!
//! Integers are stored as plain decimal text so the store can increment
//! them in place. Everything else goes through the configured serializer and
//! is compressed once it reaches `compress_min_length` bytes.

use crate::config::{CacheOptions, CompressorKind, SerializerKind};
use crate::error::{CacheError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use tracing::debug;

/// Serializer plus optional compression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    serializer: SerializerKind,
    compressor: CompressorKind,
    min_length: usize,
    zstd_level: i32,
}

impl Default for Codec {
    fn default() -> Self {
        Self::from_options(&CacheOptions::default())
    }
}

impl Codec {
    pub fn from_options(options: &CacheOptions) -> Self {
        Self {
            serializer: options.serializer,
            compressor: options.compressor,
            min_length: options.compress_min_length,
            zstd_level: options.zstd_level,
        }
    }

    /// Encode a value for storage
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        if let Ok(serde_json::Value::Number(n)) = serde_json::to_value(value) {
            if n.is_i64() || n.is_u64() {
                return Ok(n.to_string().into_bytes());
            }
        }

        let serialized = match self.serializer {
            SerializerKind::Json => serde_json::to_vec(value)?,
            SerializerKind::MsgPack => rmp_serde::to_vec(value)?,
        };
        self.compress(serialized)
    }

    /// Decode stored bytes
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        if is_decimal_integer(bytes) {
            return Ok(serde_json::from_slice(bytes)?);
        }

        let data = self.decompress(bytes);
        match self.serializer {
            SerializerKind::Json => Ok(serde_json::from_slice(&data)?),
            SerializerKind::MsgPack => Ok(rmp_serde::from_slice(&data)?),
        }
    }

    fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        if data.len() < self.min_length {
            return Ok(data);
        }

        let compressed = match self.compressor {
            CompressorKind::None => return Ok(data),
            CompressorKind::Lz4 => compress_lz4(&data),
            CompressorKind::Zstd => zstd::encode_all(data.as_slice(), self.zstd_level),
        }
        .map_err(|e| CacheError::Serialization(format!("compression failed: {}", e)))?;

        debug!(
            "{:?} compressed: {} → {} bytes",
            self.compressor,
            data.len(),
            compressed.len()
        );
        Ok(compressed)
    }

    /// Bytes that are not a valid frame were stored uncompressed
    fn decompress(&self, data: &[u8]) -> Vec<u8> {
        let decompressed = match self.compressor {
            CompressorKind::None => None,
            CompressorKind::Lz4 => decompress_lz4(data).ok(),
            CompressorKind::Zstd => zstd::decode_all(data).ok(),
        };
        decompressed.unwrap_or_else(|| data.to_vec())
    }
}

fn compress_lz4(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = lz4::EncoderBuilder::new().level(4).build(Vec::new())?;
    encoder.write_all(data)?;
    let (compressed, result) = encoder.finish();
    result?;
    Ok(compressed)
}

fn decompress_lz4(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = lz4::Decoder::new(data)?;
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Optional minus sign followed by at least one digit
pub(crate) fn is_decimal_integer(bytes: &[u8]) -> bool {
    let digits = bytes.strip_prefix(b"-").unwrap_or(bytes);
    !digits.is_empty() && digits.iter().all(u8::is_ascii_digit)
}
