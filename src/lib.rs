//! Decode-completion correlation and decode timing for real-time video pipelines.
//!
//! Hardware and software video decoders rarely report their output in a
//! convenient way: completions can arrive on a decoder-owned thread, out of
//! submission order, more than once, or not at all. This crate sits between
//! the frame buffer and such a decoder and turns its completions back into
//! well-formed frames for the renderer.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use decode_correlator::{
//!     CompletionCorrelator, DecodeOutcome, DecodedFrame, FrameInfoStore, FrameMetadata,
//!     SimulatedClock, TimingEstimator, VideoRotation,
//! };
//!
//! struct NoTiming;
//! impl TimingEstimator for NoTiming {
//!     fn stop_decode_timer(&self, _: u32, _: i64, _: i64, _: i64) {}
//! }
//!
//! # fn main() -> Result<(), decode_correlator::Error> {
//! let clock = Arc::new(SimulatedClock::new(0));
//! let correlator = CompletionCorrelator::new(Arc::new(NoTiming), clock);
//! correlator.register_receiver(Arc::new(|frame: DecodedFrame| {
//!     assert_eq!(frame.rotation, VideoRotation::Rotate90);
//! }));
//!
//! // Submission side: remember what the decoder will forget.
//! let mut store = FrameInfoStore::new(4)?;
//! let slot = store.reserve(FrameMetadata {
//!     decode_start_ms: 0,
//!     render_time_ms: 40,
//!     rotation: VideoRotation::Rotate90,
//! });
//! correlator.map(3000, slot);
//!
//! // Completion side, possibly on another thread.
//! assert!(correlator.on_decoded(DecodedFrame::new(3000)).is_dispatched());
//! assert_eq!(correlator.on_decoded(DecodedFrame::new(3000)), DecodeOutcome::DroppedNotFound);
//! # Ok(())
//! # }
//! ```
//!
//! # Core Concepts
//!
//! ## Submission
//!
//! [`DecoderAdapter`] wraps a [`VideoDecoder`]. Each `decode` call stores the
//! frame's render time, rotation, and decode-start instant in a
//! [`FrameInfoStore`] slot and registers that slot under the frame timestamp
//! before the decoder is called.
//!
//! ## Completion
//!
//! [`CompletionCorrelator`] is the decoder's [`DecodeCompleteCallback`]. It
//! pops the slot by timestamp, restores the metadata into the
//! [`DecodedFrame`], feeds the [`TimingEstimator`], and calls the registered
//! [`FrameReceiver`].
//!
//! ## Bounded backlog
//!
//! The store has a fixed number of slots. If more decodes are outstanding than
//! there are slots, the oldest submission is overwritten and its eventual
//! completion is dropped as [`DecodeOutcome::DroppedNotFound`].
//!
//! # Thread Safety
//!
//! [`CompletionCorrelator`] is `Send + Sync` and is shared with the decoder
//! through an `Arc`. Its lock is never held while the receiver runs, so
//! receivers may call back into the correlator. [`DecoderAdapter`] is `Send`
//! and is driven from a single submitting thread.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

// Internal modules
mod error;

// Public modules
pub mod async_runtime;
pub mod clock;
pub mod completion;
pub mod decoder;
pub mod frame_info;
pub mod frames;
pub mod latency;
pub mod timestamp_map;

// Re-exports
pub use {
    clock::{Clock, SimulatedClock, SystemClock},
    completion::{
        CompletionCorrelator, CorrelatorOptions, CorrelatorOptionsBuilder, CorrelatorStats,
        DecodeCompleteCallback, DecodeOutcome, FrameReceiver,
    },
    decoder::{
        CodecStatus, DecoderAdapter, DecoderConfig, DecoderConfigBuilder, DecoderKind,
        VideoDecoder,
    },
    error::*,
    frame_info::{FrameInfoStore, SlotRef, DEFAULT_FRAME_INFO_CAPACITY},
    frames::{
        CodecSpecificInfo, DecodedFrame, EncodedFrame, EncodedFrameBuilder, EncodedImage,
        FragmentationHeader, FrameMetadata, FrameType, TimestampKey, VideoCodecType,
        VideoRotation,
    },
    latency::{DecodeLatencyTracker, EndToEndMetric, LatencySample, TimingEstimator},
    timestamp_map::TimestampCorrelator,
};

#[cfg(feature = "async-std")]
pub use async_runtime::async_std;
#[cfg(feature = "tokio")]
pub use async_runtime::tokio;

/// Alias for Result with our Error type
pub type Result<T> = std::result::Result<T, crate::error::Error>;
