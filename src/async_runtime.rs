//! Async runtime integration for Tokio and async-std.
//!
//! Completions are delivered synchronously on the decoder's thread. These
//! receivers bridge that into an async application: each merged frame is
//! pushed into a bounded channel whose receiving half can be awaited from
//! any task. Sending never blocks the decoder thread; when the consumer falls
//! behind and the channel is full, the newest frame is dropped and counted.
//!
//! # Features
//!
//! - `tokio` - Enable Tokio runtime support
//! - `async-std` - Enable async-std runtime support
//!
//! # Example with Tokio
//!
//! ```no_run
//! # #[cfg(feature = "tokio")]
//! # {
//! use std::sync::Arc;
//! use decode_correlator::{
//!     async_runtime::DEFAULT_CHANNEL_CAPACITY, CompletionCorrelator, SystemClock, TimingEstimator,
//! };
//!
//! struct NoTiming;
//! impl TimingEstimator for NoTiming {
//!     fn stop_decode_timer(&self, _: u32, _: i64, _: i64, _: i64) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> decode_correlator::Result<()> {
//!     let correlator = CompletionCorrelator::new(Arc::new(NoTiming), Arc::new(SystemClock));
//!     let (receiver, mut frames) = decode_correlator::tokio::channel(DEFAULT_CHANNEL_CAPACITY)?;
//!     correlator.register_receiver(receiver);
//!
//!     // ... hand the correlator to a DecoderAdapter and start decoding ...
//!
//!     while let Some(frame) = frames.recv().await {
//!         println!("render {} at {}", frame.timestamp, frame.render_time_ms);
//!     }
//!     Ok(())
//! }
//! # }
//! ```

#[cfg(any(feature = "tokio", feature = "async-std"))]
use crate::{Error, Result};

/// Frames a channel receiver buffers before it starts dropping.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

#[cfg(any(feature = "tokio", feature = "async-std"))]
fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(Error::InvalidConfiguration(
            "channel capacity must be at least 1".into(),
        ));
    }
    Ok(())
}

#[cfg(feature = "tokio")]
pub mod tokio {
    //! Tokio async runtime integration.
    //!
    //! Provides a [`ChannelReceiver`] that forwards frames into a bounded
    //! `tokio::sync::mpsc` channel.

    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use ::tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

    use super::check_capacity;
    use crate::{completion::FrameReceiver, frames::DecodedFrame, Result};

    /// Frame receiver that feeds a Tokio channel.
    #[derive(Debug)]
    pub struct ChannelReceiver {
        tx: Sender<DecodedFrame>,
        dropped: AtomicU64,
    }

    impl ChannelReceiver {
        /// Frames discarded because the channel was full or closed.
        pub fn dropped(&self) -> u64 {
            self.dropped.load(Ordering::Relaxed)
        }
    }

    impl FrameReceiver for ChannelReceiver {
        fn frame_to_render(&self, frame: DecodedFrame) {
            let timestamp = frame.timestamp;
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    log::debug!("Frame channel full, dropping frame {timestamp}");
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Frame channel closed, dropping frame {timestamp}");
                }
            }
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Creates a receiver to register with a correlator and the matching
    /// stream of frames, buffering at most `capacity` frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration)
    /// if `capacity` is zero.
    pub fn channel(capacity: usize) -> Result<(Arc<ChannelReceiver>, Receiver<DecodedFrame>)> {
        check_capacity(capacity)?;
        let (tx, rx) = mpsc::channel(capacity);
        let receiver = ChannelReceiver {
            tx,
            dropped: AtomicU64::new(0),
        };
        Ok((Arc::new(receiver), rx))
    }

}

#[cfg(feature = "async-std")]
pub mod async_std {
    //! async-std runtime integration.
    //!
    //! Provides a [`ChannelReceiver`] that forwards frames into a bounded
    //! `async_std::channel`.

    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use ::async_std::channel::{self, Receiver, Sender, TrySendError};

    use super::check_capacity;
    use crate::{completion::FrameReceiver, frames::DecodedFrame, Result};

    /// Frame receiver that feeds an async-std channel.
    #[derive(Debug)]
    pub struct ChannelReceiver {
        tx: Sender<DecodedFrame>,
        dropped: AtomicU64,
    }

    impl ChannelReceiver {
        /// Frames discarded because the channel was full or closed.
        pub fn dropped(&self) -> u64 {
            self.dropped.load(Ordering::Relaxed)
        }
    }

    impl FrameReceiver for ChannelReceiver {
        fn frame_to_render(&self, frame: DecodedFrame) {
            let timestamp = frame.timestamp;
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    log::debug!("Frame channel full, dropping frame {timestamp}");
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Frame channel closed, dropping frame {timestamp}");
                }
            }
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Creates a receiver to register with a correlator and the matching
    /// stream of frames, buffering at most `capacity` frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration)
    /// if `capacity` is zero.
    pub fn channel(capacity: usize) -> Result<(Arc<ChannelReceiver>, Receiver<DecodedFrame>)> {
        check_capacity(capacity)?;
        let (tx, rx) = channel::bounded(capacity);
        let receiver = ChannelReceiver {
            tx,
            dropped: AtomicU64::new(0),
        };
        Ok((Arc::new(receiver), rx))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[::async_std::test]
        async fn test_frames_arrive_in_dispatch_order() {
            let (receiver, frames) = channel(4).unwrap();
            receiver.frame_to_render(DecodedFrame::new(10));
            receiver.frame_to_render(DecodedFrame::new(20));
            drop(receiver);

            assert_eq!(frames.recv().await.unwrap().timestamp, 10);
            assert_eq!(frames.recv().await.unwrap().timestamp, 20);
            assert!(frames.recv().await.is_err());
        }

        #[::async_std::test]
        async fn test_full_channel_drops_newest() {
            let (receiver, frames) = channel(3).unwrap();
            for ts in 0..100u32 {
                receiver.frame_to_render(DecodedFrame::new(ts));
            }
            assert_eq!(receiver.dropped(), 97);
            assert_eq!(frames.len(), 3);
            assert_eq!(frames.recv().await.unwrap().timestamp, 0);
        }
    }
}
