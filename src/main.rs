// src/main.rs
//! Logship Telemetry Exporter
//!
//! Reads newline-delimited JSON records from stdin and ships them to the
//! configured collector. A line is either `{"body": .., "timestamp": <ns>,
//! "attributes": {..}}` or any other JSON value, taken as the body. Lines
//! that are oversized, not UTF-8, or not JSON are logged and skipped.

use anyhow::{Context, Result};
use bytes::BytesMut;
use futures::StreamExt;
use logship_engine::export::record::{AnyValue, KeyValue, Record};
use logship_engine::observability::{init_metrics, init_tracing, render_metrics};
use logship_engine::utils::config::ExporterConfig;
use logship_engine::{BuildInfo, ExportPipeline, LifecycleState, RecordSink};
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

/// Longest accepted input line
const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize observability (tracing, metrics)
    init_tracing()?;
    init_metrics()?;

    let build = BuildInfo::current();
    info!(
        "Starting Logship exporter v{} ({}, {})",
        build.version, build.git_hash, build.rustc_version
    );

    // Load configuration
    let config = ExporterConfig::load().context("Failed to load configuration")?;
    info!("Configuration loaded: {:?}", config);

    let pipeline = ExportPipeline::open(&config)
        .await
        .context("Failed to build export pipeline")?;

    // Requests left behind by an earlier run of this session
    let replayed = pipeline.replay().await;
    if replayed.requests > 0 {
        info!(
            "Replayed {} queued requests ({} delivered)",
            replayed.requests, replayed.succeeded
        );
    }

    let mut lines = FramedRead::new(tokio::io::stdin(), InputCodec::new(MAX_LINE_BYTES));
    let mut interrupted = false;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(frame)) => {
                    ingest(&pipeline, frame);
                }
                Some(Err(e)) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
                None => {
                    debug!("Input closed");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Received shutdown signal, flushing...");
                interrupted = true;
                break;
            }
        }
    }

    if interrupted {
        pipeline.set_lifecycle(LifecycleState::Hidden).await;
    }
    pipeline.shutdown().await;

    let stats = pipeline.coordinator().stats();
    info!(
        "Exporter stopped: {} requests, {} delivered, {} failed, {} aborted",
        stats.requests, stats.succeeded, stats.failed, stats.aborted
    );
    if let Some(metrics) = render_metrics() {
        debug!("Final metrics:\n{}", metrics);
    }

    Ok(())
}

/// One frame of input
#[derive(Debug, PartialEq)]
enum InputLine {
    Text(String),
    TooLong,
    NotUtf8,
}

/// `LinesCodec` that yields bad lines as frames instead of ending the stream
struct InputCodec {
    lines: LinesCodec,
}

impl InputCodec {
    fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn frame(
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> std::result::Result<Option<InputLine>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(InputLine::Text)),
            // The codec discards the rest of the line on its own
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(InputLine::TooLong)),
            // Only UTF-8 failures surface as InvalidData; reader errors pass through
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(InputLine::NotUtf8))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for InputCodec {
    type Item = InputLine;
    type Error = LinesCodecError;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<InputLine>, LinesCodecError> {
        Self::frame(self.lines.decode(buf))
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<InputLine>, LinesCodecError> {
        Self::frame(self.lines.decode_eof(buf))
    }
}

/// Hand one input frame to the pipeline; returns whether a record was accepted
fn ingest(sink: &dyn RecordSink, frame: InputLine) -> bool {
    let line = match frame {
        InputLine::Text(line) => line,
        InputLine::TooLong => {
            warn!("Skipping oversized input line");
            return false;
        }
        InputLine::NotUtf8 => {
            warn!("Skipping input line that is not valid UTF-8");
            return false;
        }
    };

    if line.trim().is_empty() {
        return false;
    }

    match parse_record(&line) {
        Ok(record) => match sink.on_record(record) {
            Ok(()) => true,
            Err(e) => {
                warn!("Record rejected: {}", e);
                false
            }
        },
        Err(e) => {
            warn!("Skipping malformed line: {}", e);
            false
        }
    }
}

fn parse_record(line: &str) -> Result<Record> {
    let value: serde_json::Value = serde_json::from_str(line).context("invalid JSON")?;

    let mut object = match value {
        serde_json::Value::Object(object) => object,
        other => return Ok(Record::now(AnyValue::from(other))),
    };

    let Some(body) = object.remove("body") else {
        return Ok(Record::now(AnyValue::from(serde_json::Value::Object(object))));
    };

    let mut record = match object.get("timestamp").and_then(|ts| ts.as_u64()) {
        Some(nanos) => Record::new(AnyValue::from(body), nanos),
        None => Record::now(AnyValue::from(body)),
    };

    if let Some(serde_json::Value::Object(attributes)) = object.remove("attributes") {
        record.attributes = attributes
            .into_iter()
            .map(|(key, value)| KeyValue::new(key, AnyValue::from(value)))
            .collect();
    }

    Ok(record)
}
