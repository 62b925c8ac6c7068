//! Decode latency measurement.
//!
//! Every correlated completion yields one decode-time sample for the
//! [`TimingEstimator`]. When the decoded frame carries the sender's capture
//! time, two end-to-end diagnostics are derived as well, but only once they
//! fall inside a sanity window: before the local/NTP clock offset has settled
//! the values are garbage and must not reach the estimator.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    clock::Clock,
    frames::{DecodedFrame, FrameMetadata, TimestampKey},
};

/// Default bound on plausible end-to-end delays.
pub const DEFAULT_SANITY_WINDOW: Duration = Duration::from_secs(10);

/// End-to-end diagnostic kinds reported to [`TimingEstimator::end_to_end_sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndToEndMetric {
    /// Sender capture to decode finished.
    DecodeFinished,
    /// Sender capture to the frame's intended render time.
    RenderDelay,
}

/// Consumer of decode timing samples, typically the jitter/render-delay logic.
pub trait TimingEstimator: Send + Sync {
    /// One decode finished. `now_ms - decode_start_ms` is the decode time.
    fn stop_decode_timer(
        &self,
        timestamp: TimestampKey,
        decode_start_ms: i64,
        now_ms: i64,
        render_time_ms: i64,
    );

    /// An end-to-end diagnostic that passed the sanity window.
    fn end_to_end_sample(&self, _metric: EndToEndMetric, _delay_ms: i64) {}
}

/// What was measured for one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    pub timestamp: TimestampKey,
    pub decode_time_ms: i64,
    pub decode_finished_ms: Option<i64>,
    pub render_delay_ms: Option<i64>,
}

/// Turns submission metadata plus a completion instant into timing samples.
pub struct DecodeLatencyTracker {
    timing: Arc<dyn TimingEstimator>,
    clock: Arc<dyn Clock>,
    end_to_end: bool,
    sanity_window_ms: i64,
    samples: AtomicU64,
}

impl DecodeLatencyTracker {
    pub fn new(timing: Arc<dyn TimingEstimator>, clock: Arc<dyn Clock>) -> Self {
        Self::with_options(timing, clock, true, DEFAULT_SANITY_WINDOW)
    }

    pub fn with_options(
        timing: Arc<dyn TimingEstimator>,
        clock: Arc<dyn Clock>,
        end_to_end: bool,
        sanity_window: Duration,
    ) -> Self {
        Self {
            timing,
            clock,
            end_to_end,
            sanity_window_ms: i64::try_from(sanity_window.as_millis()).unwrap_or(i64::MAX),
            samples: AtomicU64::new(0),
        }
    }

    /// Records the completion of `frame`, whose submission captured `metadata`.
    pub fn record(&self, frame: &DecodedFrame, metadata: &FrameMetadata) -> LatencySample {
        let now_ms = self.clock.time_in_ms();
        self.timing.stop_decode_timer(
            frame.timestamp,
            metadata.decode_start_ms,
            now_ms,
            metadata.render_time_ms,
        );
        self.samples.fetch_add(1, Ordering::Relaxed);

        let mut sample = LatencySample {
            timestamp: frame.timestamp,
            decode_time_ms: now_ms.saturating_sub(metadata.decode_start_ms),
            decode_finished_ms: None,
            render_delay_ms: None,
        };

        if self.end_to_end && frame.ntp_time_ms > 0 {
            let ntp_now_ms = self.clock.ntp_time_ms();
            let ntp_delta_ms = ntp_now_ms.saturating_sub(now_ms);

            sample.decode_finished_ms = self.report(
                EndToEndMetric::DecodeFinished,
                ntp_now_ms.saturating_sub(frame.ntp_time_ms),
                frame.timestamp,
            );
            sample.render_delay_ms = self.report(
                EndToEndMetric::RenderDelay,
                metadata
                    .render_time_ms
                    .saturating_add(ntp_delta_ms)
                    .saturating_sub(frame.ntp_time_ms),
                frame.timestamp,
            );
        }

        sample
    }

    fn report(
        &self,
        metric: EndToEndMetric,
        delay_ms: i64,
        timestamp: TimestampKey,
    ) -> Option<i64> {
        if delay_ms > -self.sanity_window_ms && delay_ms < self.sanity_window_ms {
            self.timing.end_to_end_sample(metric, delay_ms);
            Some(delay_ms)
        } else {
            log::trace!("Discarding {metric:?} sample of {delay_ms} ms for timestamp {timestamp}");
            None
        }
    }

    /// Number of decode-time samples emitted so far.
    pub fn samples_recorded(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SimulatedClock, frames::VideoRotation};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTiming {
        decodes: Mutex<Vec<(TimestampKey, i64, i64, i64)>>,
        end_to_end: Mutex<Vec<(EndToEndMetric, i64)>>,
    }

    impl TimingEstimator for RecordingTiming {
        fn stop_decode_timer(
            &self,
            timestamp: TimestampKey,
            decode_start_ms: i64,
            now_ms: i64,
            render_time_ms: i64,
        ) {
            self.decodes
                .lock()
                .unwrap()
                .push((timestamp, decode_start_ms, now_ms, render_time_ms));
        }

        fn end_to_end_sample(&self, metric: EndToEndMetric, delay_ms: i64) {
            self.end_to_end.lock().unwrap().push((metric, delay_ms));
        }
    }

    fn setup(
        end_to_end: bool,
    ) -> (Arc<RecordingTiming>, Arc<SimulatedClock>, DecodeLatencyTracker) {
        let timing = Arc::new(RecordingTiming::default());
        let clock = Arc::new(SimulatedClock::new(1_000));
        let tracker = DecodeLatencyTracker::with_options(
            timing.clone(),
            clock.clone(),
            end_to_end,
            DEFAULT_SANITY_WINDOW,
        );
        (timing, clock, tracker)
    }

    fn metadata() -> FrameMetadata {
        FrameMetadata {
            decode_start_ms: 990,
            render_time_ms: 1_050,
            rotation: VideoRotation::Rotate0,
        }
    }

    #[test]
    fn test_decode_time_sample() {
        let (timing, _clock, tracker) = setup(true);
        let sample = tracker.record(&DecodedFrame::new(3000), &metadata());

        assert_eq!(sample.decode_time_ms, 10);
        assert_eq!(sample.decode_finished_ms, None);
        assert_eq!(sample.render_delay_ms, None);
        assert_eq!(*timing.decodes.lock().unwrap(), vec![(3000, 990, 1_000, 1_050)]);
        assert!(timing.end_to_end.lock().unwrap().is_empty());
        assert_eq!(tracker.samples_recorded(), 1);
    }

    #[test]
    fn test_end_to_end_within_window() {
        let (timing, clock, tracker) = setup(true);
        clock.set_ntp_offset_ms(50_000);
        // Captured 120 ms before "now" in NTP time.
        let frame = DecodedFrame::new(1).with_ntp_time_ms(51_000 - 120);
        let sample = tracker.record(&frame, &metadata());

        assert_eq!(sample.decode_finished_ms, Some(120));
        // render 1050 + delta 50000 - ntp 50880
        assert_eq!(sample.render_delay_ms, Some(170));
        assert_eq!(
            *timing.end_to_end.lock().unwrap(),
            vec![
                (EndToEndMetric::DecodeFinished, 120),
                (EndToEndMetric::RenderDelay, 170)
            ]
        );
    }

    #[test]
    fn test_end_to_end_outside_window_discarded() {
        let (timing, clock, tracker) = setup(true);
        clock.set_ntp_offset_ms(3_600_000);
        let frame = DecodedFrame::new(1).with_ntp_time_ms(5);
        let sample = tracker.record(&frame, &metadata());

        assert_eq!(sample.decode_finished_ms, None);
        assert_eq!(sample.render_delay_ms, None);
        assert!(timing.end_to_end.lock().unwrap().is_empty());
        // The decode-time sample is still recorded.
        assert_eq!(timing.decodes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_window_bounds_are_exclusive() {
        let (timing, clock, tracker) = setup(true);
        clock.set_ntp_offset_ms(100_000);
        // Origin time exactly 10 s ahead of NTP now: decode-finished is -10 s.
        let frame = DecodedFrame::new(1).with_ntp_time_ms(111_000);
        let sample = tracker.record(&frame, &metadata());
        assert_eq!(sample.decode_finished_ms, None);
        assert_eq!(sample.render_delay_ms, Some(-9_950));
        assert_eq!(
            *timing.end_to_end.lock().unwrap(),
            vec![(EndToEndMetric::RenderDelay, -9_950)]
        );
    }

    #[test]
    fn test_extreme_inputs_saturate() {
        let (timing, clock, tracker) = setup(true);
        clock.set_ntp_offset_ms(i64::MAX);
        let frame = DecodedFrame::new(1).with_ntp_time_ms(1);
        let metadata = FrameMetadata {
            decode_start_ms: i64::MIN,
            render_time_ms: i64::MAX,
            rotation: VideoRotation::Rotate0,
        };

        let sample = tracker.record(&frame, &metadata);
        assert_eq!(sample.decode_time_ms, i64::MAX);
        assert_eq!(sample.decode_finished_ms, None);
        assert_eq!(sample.render_delay_ms, None);
        assert!(timing.end_to_end.lock().unwrap().is_empty());
    }

    #[test]
    fn test_end_to_end_disabled() {
        let (timing, clock, tracker) = setup(false);
        clock.set_ntp_offset_ms(50_000);
        let frame = DecodedFrame::new(1).with_ntp_time_ms(50_900);
        let sample = tracker.record(&frame, &metadata());
        assert_eq!(sample.decode_finished_ms, None);
        assert!(timing.end_to_end.lock().unwrap().is_empty());
    }
}
