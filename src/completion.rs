//! Completion-side correlation and dispatch.
//!
//! The decoder reports finished frames through [`DecodeCompleteCallback`],
//! from whatever thread it likes and possibly before the submitting `decode`
//! call has returned. [`CompletionCorrelator`] finds the submission's metadata
//! by timestamp, merges it back into the frame, records decode latency, and
//! hands the frame to the application's [`FrameReceiver`].
//!
//! Each submission ends in exactly one [`DecodeOutcome`]. There are no retries.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use crate::{
    clock::Clock,
    frame_info::{SlotRef, DEFAULT_FRAME_INFO_CAPACITY},
    frames::{DecodedFrame, TimestampKey},
    latency::{DecodeLatencyTracker, LatencySample, TimingEstimator, DEFAULT_SANITY_WINDOW},
    timestamp_map::TimestampCorrelator,
    Error, Result,
};

/// Application-side consumer of decoded frames.
///
/// Called synchronously on the decoder's completion thread with no internal
/// lock held, so implementations may call back into the pipeline.
///
/// Any `Fn(DecodedFrame) + Send + Sync` closure is a receiver:
///
/// ```
/// use std::sync::Arc;
/// use decode_correlator::{CompletionCorrelator, DecodedFrame, FrameReceiver, SimulatedClock};
/// # use decode_correlator::TimingEstimator;
/// # struct NoTiming;
/// # impl TimingEstimator for NoTiming {
/// #     fn stop_decode_timer(&self, _: u32, _: i64, _: i64, _: i64) {}
/// # }
///
/// let clock = Arc::new(SimulatedClock::new(0));
/// let correlator = CompletionCorrelator::new(Arc::new(NoTiming), clock);
/// correlator.register_receiver(Arc::new(|frame: DecodedFrame| {
///     println!("render {} at {}", frame.timestamp, frame.render_time_ms);
/// }));
/// assert!(correlator.receiver().is_some());
/// ```
pub trait FrameReceiver: Send + Sync {
    /// A decoded frame with render time and rotation restored.
    fn frame_to_render(&self, frame: DecodedFrame);

    /// The decoder finished a frame that later frames will reference.
    fn received_decoded_reference_frame(&self, _picture_id: u64) -> Result<()> {
        Ok(())
    }

    /// The decoder finished the frame with this picture id.
    fn received_decoded_frame(&self, _picture_id: u64) {}
}

impl<F> FrameReceiver for F
where
    F: Fn(DecodedFrame) + Send + Sync,
{
    fn frame_to_render(&self, frame: DecodedFrame) {
        self(frame)
    }
}

/// The sink a [`VideoDecoder`](crate::VideoDecoder) reports completions to.
pub trait DecodeCompleteCallback: Send + Sync {
    /// A frame finished decoding. May be called from any thread, any number of times.
    fn decoded(&self, frame: DecodedFrame);

    fn received_decoded_reference_frame(&self, picture_id: u64) -> Result<()>;

    fn received_decoded_frame(&self, picture_id: u64);
}

/// Terminal state of one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Metadata merged and the frame handed to the receiver.
    Dispatched(LatencySample),
    /// No live submission for this timestamp: it was never mapped, already
    /// completed, released after a failed decode, or overwritten by backlog.
    DroppedNotFound,
    /// Correlated and measured, but no receiver was registered.
    DroppedNoReceiver(LatencySample),
}

impl DecodeOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DecodeOutcome::Dispatched(_))
    }

    pub fn latency(&self) -> Option<&LatencySample> {
        match self {
            DecodeOutcome::Dispatched(sample) | DecodeOutcome::DroppedNoReceiver(sample) => {
                Some(sample)
            }
            DecodeOutcome::DroppedNotFound => None,
        }
    }
}

/// Snapshot of completion counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub dispatched: u64,
    pub not_found: u64,
    pub no_receiver: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    not_found: AtomicU64,
    no_receiver: AtomicU64,
}

/// Configuration for a [`CompletionCorrelator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatorOptions {
    /// Derive end-to-end delay diagnostics from the frame's origin time.
    pub end_to_end_diagnostics: bool,
    /// End-to-end values outside `(-window, window)` are discarded.
    pub sanity_window: Duration,
    /// Number of outstanding submissions the timestamp map is sized for.
    /// Match the adapter's frame info capacity.
    pub pending_capacity: usize,
}

impl Default for CorrelatorOptions {
    fn default() -> Self {
        Self {
            end_to_end_diagnostics: true,
            sanity_window: DEFAULT_SANITY_WINDOW,
            pending_capacity: DEFAULT_FRAME_INFO_CAPACITY,
        }
    }
}

impl CorrelatorOptions {
    /// Create a builder for configuring correlator options
    pub fn builder() -> CorrelatorOptionsBuilder {
        CorrelatorOptionsBuilder::new()
    }
}

/// Builder for [`CorrelatorOptions`]
#[derive(Debug, Clone, Default)]
pub struct CorrelatorOptionsBuilder {
    end_to_end_diagnostics: Option<bool>,
    sanity_window: Option<Duration>,
    pending_capacity: Option<usize>,
}

impl CorrelatorOptionsBuilder {
    /// Creates a new builder with default settings.
    ///
    /// Default settings:
    /// - `end_to_end_diagnostics`: `true`
    /// - `sanity_window`: 10 seconds
    /// - `pending_capacity`: [`DEFAULT_FRAME_INFO_CAPACITY`]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn end_to_end_diagnostics(mut self, enabled: bool) -> Self {
        self.end_to_end_diagnostics = Some(enabled);
        self
    }

    #[must_use]
    pub fn sanity_window(mut self, window: Duration) -> Self {
        self.sanity_window = Some(window);
        self
    }

    #[must_use]
    pub fn pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = Some(capacity);
        self
    }

    /// Build the CorrelatorOptions
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the sanity window is shorter
    /// than one millisecond.
    pub fn build(self) -> Result<CorrelatorOptions> {
        let sanity_window = self.sanity_window.unwrap_or(DEFAULT_SANITY_WINDOW);
        if sanity_window.as_millis() == 0 {
            return Err(Error::InvalidConfiguration(
                "sanity window must be at least 1 ms".into(),
            ));
        }
        Ok(CorrelatorOptions {
            end_to_end_diagnostics: self.end_to_end_diagnostics.unwrap_or(true),
            sanity_window,
            pending_capacity: self
                .pending_capacity
                .unwrap_or(DEFAULT_FRAME_INFO_CAPACITY),
        })
    }
}

/// State shared between the submitting thread and completion threads.
struct Shared {
    timestamps: TimestampCorrelator,
    receiver: Option<Arc<dyn FrameReceiver>>,
}

/// Matches decoder completions to their submissions and dispatches them.
///
/// One instance per decode pipeline. The timestamp map and the receiver
/// reference live behind a single mutex, which is released before the
/// receiver is called.
pub struct CompletionCorrelator {
    shared: Mutex<Shared>,
    latency: DecodeLatencyTracker,
    last_received_picture_id: AtomicU64,
    counters: Counters,
}

impl CompletionCorrelator {
    pub fn new(timing: Arc<dyn TimingEstimator>, clock: Arc<dyn Clock>) -> Self {
        Self::with_options(timing, clock, &CorrelatorOptions::default())
    }

    pub fn with_options(
        timing: Arc<dyn TimingEstimator>,
        clock: Arc<dyn Clock>,
        options: &CorrelatorOptions,
    ) -> Self {
        Self {
            shared: Mutex::new(Shared {
                timestamps: TimestampCorrelator::with_capacity(options.pending_capacity),
                receiver: None,
            }),
            latency: DecodeLatencyTracker::with_options(
                timing,
                clock,
                options.end_to_end_diagnostics,
                options.sanity_window,
            ),
            last_received_picture_id: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets the receiver for subsequent completions, replacing any previous one.
    pub fn register_receiver(&self, receiver: Arc<dyn FrameReceiver>) {
        self.lock().receiver = Some(receiver);
    }

    /// Removes the receiver. Completions are still correlated and measured,
    /// then dropped.
    pub fn unregister_receiver(&self) -> Option<Arc<dyn FrameReceiver>> {
        self.lock().receiver.take()
    }

    pub fn receiver(&self) -> Option<Arc<dyn FrameReceiver>> {
        self.lock().receiver.clone()
    }

    /// Registers the submission occupying `slot` under `timestamp`.
    pub fn map(&self, timestamp: TimestampKey, slot: SlotRef) {
        self.lock().timestamps.map(timestamp, slot);
    }

    /// Releases the entry for `timestamp`, returning it if it was present.
    pub fn pop(&self, timestamp: TimestampKey) -> Option<SlotRef> {
        self.lock().timestamps.pop(timestamp)
    }

    /// Number of submissions still awaiting a completion.
    pub fn pending(&self) -> usize {
        self.lock().timestamps.len()
    }

    /// Correlates and dispatches one decoded frame.
    pub fn on_decoded(&self, mut frame: DecodedFrame) -> DecodeOutcome {
        let timestamp = frame.timestamp;
        let (slot, receiver) = {
            let mut shared = self.lock();
            (shared.timestamps.pop(timestamp), shared.receiver.clone())
        };

        let Some(metadata) = slot.and_then(|slot| slot.load()) else {
            log::warn!(
                "Too many frames backed up in the decoder, \
                 dropping frame with timestamp {timestamp}"
            );
            self.counters.not_found.fetch_add(1, Ordering::Relaxed);
            return DecodeOutcome::DroppedNotFound;
        };

        let sample = self.latency.record(&frame, &metadata);
        frame.merge(&metadata);

        match receiver {
            Some(receiver) => {
                log::trace!(
                    "Dispatching frame {timestamp} (decode {} ms)",
                    sample.decode_time_ms
                );
                receiver.frame_to_render(frame);
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                DecodeOutcome::Dispatched(sample)
            }
            None => {
                self.counters.no_receiver.fetch_add(1, Ordering::Relaxed);
                DecodeOutcome::DroppedNoReceiver(sample)
            }
        }
    }

    /// Forwards a reference-frame notification to the receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoReceiver`] if no receiver is registered, or whatever
    /// the receiver returns.
    pub fn received_decoded_reference_frame(&self, picture_id: u64) -> Result<()> {
        let receiver = self.receiver().ok_or(Error::NoReceiver)?;
        receiver.received_decoded_reference_frame(picture_id)
    }

    /// Records `picture_id` as the most recently decoded picture and notifies the receiver.
    pub fn received_decoded_frame(&self, picture_id: u64) {
        self.last_received_picture_id
            .store(picture_id, Ordering::Release);
        if let Some(receiver) = self.receiver() {
            receiver.received_decoded_frame(picture_id);
        }
    }

    pub fn last_received_picture_id(&self) -> u64 {
        self.last_received_picture_id.load(Ordering::Acquire)
    }

    /// Number of decode-time samples fed to the timing estimator.
    pub fn latency_samples(&self) -> u64 {
        self.latency.samples_recorded()
    }

    pub fn stats(&self) -> CorrelatorStats {
        CorrelatorStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            not_found: self.counters.not_found.load(Ordering::Relaxed),
            no_receiver: self.counters.no_receiver.load(Ordering::Relaxed),
        }
    }
}

impl DecodeCompleteCallback for CompletionCorrelator {
    fn decoded(&self, frame: DecodedFrame) {
        self.on_decoded(frame);
    }

    fn received_decoded_reference_frame(&self, picture_id: u64) -> Result<()> {
        CompletionCorrelator::received_decoded_reference_frame(self, picture_id)
    }

    fn received_decoded_frame(&self, picture_id: u64) {
        CompletionCorrelator::received_decoded_frame(self, picture_id)
    }
}

impl fmt::Debug for CompletionCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.lock();
        f.debug_struct("CompletionCorrelator")
            .field("pending", &shared.timestamps.len())
            .field("receiver_set", &shared.receiver.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}
