/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Error types for the ingest pipeline.

use thiserror::Error;

/// All errors in `ndi-ingest`.
///
/// Per-frame hot paths absorb these locally (log, drop the frame, keep
/// going); only control-plane operations propagate them to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("NDI runtime is not initialized. Call `NdiSystem::initialize` first!")]
    RuntimeNotInitialized,
    #[error("Native handle creation failed: {0}")]
    HandleCreationFailed(String),
    #[error("Could not connect to source {0}")]
    ConnectionFailed(String),
    #[error("Connection to {0} was lost")]
    ConnectionLost(String),
    #[error("Unsupported pixel format {0}")]
    UnsupportedPixelFormat(String),
    #[error("Frame buffer too small: {got} bytes, need {need}")]
    InvalidBuffer { got: usize, need: usize },
    #[error("Declared stride {stride} smaller than row bytes {row_bytes}")]
    InvalidStride { stride: i32, row_bytes: usize },
    #[error("Unsupported recording format: {0}")]
    UnsupportedRecordingFormat(String),
    #[error("A recording is already active")]
    RecordingAlreadyActive,
    #[error("Muxer write failed: {0}")]
    MuxerWriteFailed(String),
    #[error("Decoder fault: {0}")]
    DecoderFault(String),
    #[error("Encoder fault: {0}")]
    EncoderFault(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Io(e.to_string())
    }
}
