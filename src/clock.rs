//! Time sources for decode-start capture and latency computation.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use once_cell::sync::Lazy;

/// Milliseconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET_MS: i64 = 2_208_988_800_000;

/// A source of local monotonic time and NTP wall-clock time.
///
/// `time_in_ms` is used for decode-start capture and decode latency; it only
/// needs to be monotonic. `ntp_time_ms` is used to compare against the sender's
/// capture time for end-to-end diagnostics.
pub trait Clock: Send + Sync {
    /// Monotonic local time in milliseconds.
    fn time_in_ms(&self) -> i64;

    /// Wall-clock time in NTP milliseconds.
    fn ntp_time_ms(&self) -> i64;
}

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// The real clock: monotonic time since process start, and the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn time_in_ms(&self) -> i64 {
        PROCESS_START.elapsed().as_millis() as i64
    }

    fn ntp_time_ms(&self) -> i64 {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        since_unix.as_millis() as i64 + NTP_UNIX_OFFSET_MS
    }
}

/// A manually advanced clock for tests and simulations.
///
/// NTP time is derived from local time plus a configurable offset, which
/// models the local/NTP delta a real receiver learns from RTCP.
///
/// # Examples
///
/// ```
/// use decode_correlator::{Clock, SimulatedClock};
///
/// let clock = SimulatedClock::new(1_000);
/// clock.advance_ms(16);
/// assert_eq!(clock.time_in_ms(), 1_016);
///
/// clock.set_ntp_offset_ms(5_000);
/// assert_eq!(clock.ntp_time_ms(), 6_016);
/// ```
#[derive(Debug, Default)]
pub struct SimulatedClock {
    now_ms: AtomicI64,
    ntp_offset_ms: AtomicI64,
}

impl SimulatedClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
            ntp_offset_ms: AtomicI64::new(0),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }

    pub fn set_time_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::Release);
    }

    /// Set the difference between NTP time and local time.
    pub fn set_ntp_offset_ms(&self, offset_ms: i64) {
        self.ntp_offset_ms.store(offset_ms, Ordering::Release);
    }
}

impl Clock for SimulatedClock {
    fn time_in_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire)
    }

    fn ntp_time_ms(&self) -> i64 {
        self.time_in_ms()
            .saturating_add(self.ntp_offset_ms.load(Ordering::Acquire))
    }
}
