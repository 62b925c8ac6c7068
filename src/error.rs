//! Error types for the decode-correlator library.

use thiserror::Error;

use crate::{decoder::CodecStatus, frames::VideoCodecType};

/// The main error type for decoder and correlation operations.
///
/// Only errors that cross a synchronous call boundary are represented here.
/// Completions that cannot be correlated, or that arrive while no receiver is
/// registered, are reported as [`DecodeOutcome`](crate::DecodeOutcome) values
/// instead, since the submitting call has usually returned by then.
#[derive(Debug, Error)]
pub enum Error {
    /// The wrapped decoder refused its configuration or ran out of resources.
    ///
    /// This is fatal to that decoder instance.
    #[error("Failed to initialize {codec:?} decoder: {status:?}")]
    DecoderInit {
        codec: VideoCodecType,
        status: CodecStatus,
    },

    /// A single frame failed to decode.
    ///
    /// The frame's correlation entry has already been released; the pipeline
    /// can continue with the next frame.
    #[error("Failed to decode frame with timestamp {timestamp}: {status:?}")]
    Decode { timestamp: u32, status: CodecStatus },

    /// A lifecycle call on the wrapped decoder returned a failure status.
    #[error("Decoder {operation} failed: {status:?}")]
    Codec {
        operation: &'static str,
        status: CodecStatus,
    },

    /// `decode` was called before a completion callback was registered.
    #[error("No decode-complete callback registered")]
    CallbackNotRegistered,

    /// A receiver-directed notification arrived while no receiver was registered.
    #[error("No frame receiver registered")]
    NoReceiver,

    /// An externally injected decoder reported a status code outside the known set.
    #[error("Unknown codec status code: {0}")]
    UnknownStatus(i32),

    /// Configuration parameters are invalid.
    ///
    /// This can occur when builder validation fails.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
