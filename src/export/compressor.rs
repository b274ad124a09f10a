// src/export/compressor.rs
//! Request body compression with graceful fallback
//!
//! The compressor tries a streaming strategy first (block-wise encoding on
//! the blocking pool, bounded by a per-attempt timeout). If the strategy is
//! unsupported, fails, or stays slow for its whole attempt budget, it falls
//! back to a one-shot in-memory strategy. Both speak the same content
//! encoding, so the receiver never sees the difference.

use crate::utils::errors::{ExporterError, Result};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts granted to the streaming strategy before falling back
pub const MAX_STREAMING_ATTEMPTS: u32 = 3;

/// Content encodings understood by collectors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    #[default]
    Gzip,
    Zstd,
}

impl ContentEncoding {
    /// Value for the `Content-Encoding` header
    pub fn as_header(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Zstd => "zstd",
        }
    }
}

/// Compression levels
#[derive(Debug, Clone, Copy, Default)]
pub enum CompressionLevel {
    Fast,

    #[default]
    Balanced,

    Best,
}

impl CompressionLevel {
    fn gzip(&self) -> flate2::Compression {
        match self {
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Balanced => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }

    fn zstd(&self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// A way of producing an encoded body
pub trait CompressionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capability check; the compressor caches the answer
    fn is_supported(&self) -> bool {
        true
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Block-wise streaming encoder
pub struct StreamingCodec {
    encoding: ContentEncoding,
    level: CompressionLevel,
    block_size: usize,
}

impl StreamingCodec {
    pub fn new(encoding: ContentEncoding, level: CompressionLevel) -> Self {
        Self {
            encoding,
            level,
            block_size: 64 * 1024,
        }
    }

    fn encode_blocks<W: Write>(&self, writer: &mut W, data: &[u8]) -> std::io::Result<()> {
        for block in data.chunks(self.block_size) {
            writer.write_all(block)?;
        }
        Ok(())
    }
}

impl CompressionStrategy for StreamingCodec {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn is_supported(&self) -> bool {
        self.compress(b"capability check").is_ok()
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let out = Vec::with_capacity(data.len() / 4 + 64);

        let result = match self.encoding {
            ContentEncoding::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(out, self.level.gzip());
                match self.encode_blocks(&mut encoder, data) {
                    Ok(()) => encoder.finish(),
                    Err(e) => Err(e),
                }
            }
            ContentEncoding::Zstd => zstd::stream::write::Encoder::new(out, self.level.zstd())
                .and_then(|mut encoder| {
                    self.encode_blocks(&mut encoder, data)?;
                    encoder.finish()
                }),
        };

        result.map_err(|e| ExporterError::Compression(format!("Streaming compression error: {}", e)))
    }
}

/// One-shot in-memory encoder
pub struct BufferedCodec {
    encoding: ContentEncoding,
    level: CompressionLevel,
}

impl BufferedCodec {
    pub fn new(encoding: ContentEncoding, level: CompressionLevel) -> Self {
        Self { encoding, level }
    }
}

impl CompressionStrategy for BufferedCodec {
    fn name(&self) -> &'static str {
        "buffered"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let result = match self.encoding {
            ContentEncoding::Gzip => {
                let mut encoder = flate2::read::GzEncoder::new(data, self.level.gzip());
                let mut compressed = Vec::new();
                encoder.read_to_end(&mut compressed).map(|_| compressed)
            }
            ContentEncoding::Zstd => zstd::encode_all(data, self.level.zstd()),
        };

        result.map_err(|e| ExporterError::Compression(format!("Compression error: {}", e)))
    }
}

/// Compressor owning its strategies and the cached capability flag
pub struct Compressor {
    encoding: ContentEncoding,
    primary: Arc<dyn CompressionStrategy>,
    fallback: Arc<dyn CompressionStrategy>,
    primary_supported: OnceCell<bool>,
    attempt_timeout: Duration,
}

impl Compressor {
    /// Streaming-first compressor for `encoding`
    pub fn new(encoding: ContentEncoding) -> Self {
        let level = CompressionLevel::default();
        Self::with_strategies(
            encoding,
            Arc::new(StreamingCodec::new(encoding, level)),
            Arc::new(BufferedCodec::new(encoding, level)),
        )
    }

    /// Compressor with injected strategies
    pub fn with_strategies(
        encoding: ContentEncoding,
        primary: Arc<dyn CompressionStrategy>,
        fallback: Arc<dyn CompressionStrategy>,
    ) -> Self {
        Self {
            encoding,
            primary,
            fallback,
            primary_supported: OnceCell::new(),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Compress data, preferring the streaming strategy
    pub async fn compress(&self, data: Bytes) -> Result<Vec<u8>> {
        let supported = *self.primary_supported.get_or_init(|| {
            let supported = self.primary.is_supported();
            debug!("{} compression supported: {}", self.primary.name(), supported);
            supported
        });

        if supported {
            match self.compress_streaming(data.clone()).await {
                Ok(compressed) => {
                    debug!(
                        "Compressed {} bytes -> {} bytes ({})",
                        data.len(),
                        compressed.len(),
                        self.encoding.as_header()
                    );
                    return Ok(compressed);
                }
                Err(e) => {
                    warn!("Streaming compression unavailable, falling back: {}", e);
                }
            }
        }

        metrics::counter!("logship_compression_fallback_total").increment(1);

        let fallback = Arc::clone(&self.fallback);
        tokio::task::spawn_blocking(move || fallback.compress(&data))
            .await
            .map_err(|e| ExporterError::Compression(format!("Compression task failed: {}", e)))?
            .map_err(|e| {
                ExporterError::Compression(format!("All compression strategies failed: {}", e))
            })
    }

    /// Run the primary strategy; timeouts are retried, errors are not
    async fn compress_streaming(&self, data: Bytes) -> Result<Vec<u8>> {
        for attempt in 1..=MAX_STREAMING_ATTEMPTS {
            let primary = Arc::clone(&self.primary);
            let input = data.clone();
            let task = tokio::task::spawn_blocking(move || primary.compress(&input));

            match tokio::time::timeout(self.attempt_timeout, task).await {
                Ok(Ok(result)) => return result,
                Ok(Err(join_err)) => {
                    return Err(ExporterError::Compression(format!(
                        "Compression task failed: {}",
                        join_err
                    )));
                }
                Err(_) => {
                    debug!(
                        "Streaming compression attempt {}/{} timed out",
                        attempt, MAX_STREAMING_ATTEMPTS
                    );
                }
            }
        }

        Err(ExporterError::Compression(format!(
            "streaming compression timed out {} times",
            MAX_STREAMING_ATTEMPTS
        )))
    }

    /// Decompress a body produced by this compressor
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let result = match self.encoding {
            ContentEncoding::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out).map(|_| out)
            }
            ContentEncoding::Zstd => zstd::decode_all(data),
        };

        result.map_err(|e| ExporterError::Compression(format!("Decompression error: {}", e)))
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(ContentEncoding::Gzip)
    }
}
