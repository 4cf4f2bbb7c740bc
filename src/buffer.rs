//! Buffering and flush policy for advertisement events.
//!
//! This module accumulates accepted events between publishes. Two modes are
//! supported: immediate mode (zero flush interval) keeps every event in
//! arrival order and flushes as soon as anything is pending, while windowed
//! mode holds events for the configured interval. Windowed mode can
//! additionally throttle chatty devices by keeping only the most recent
//! event per source address.

use crate::advertisement::AdvertisementEvent;
use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Buffering and throttling policy, fixed for the lifetime of the buffer.
#[derive(Debug, Clone)]
pub struct BufferPolicy {
    /// Time between flushes. Zero selects immediate mode.
    pub flush_interval: Duration,
    /// Pending-event count that forces a flush before the interval elapses.
    pub max_batch_size: usize,
    /// Keep only the latest event per device while buffering.
    ///
    /// Has no effect in immediate mode, where events are published too
    /// quickly for per-device collapsing to mean anything.
    pub throttle: bool,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        BufferPolicy {
            flush_interval: Duration::ZERO,
            max_batch_size: 100,
            throttle: true,
        }
    }
}

/// Pending events, stored to match the active policy.
#[derive(Debug)]
enum Pending {
    /// Every accepted event, in arrival order.
    All(Vec<AdvertisementEvent>),
    /// Only the most recent event per source address.
    LatestPerSource(HashMap<MacAddress, AdvertisementEvent>),
}

impl Pending {
    fn len(&self) -> usize {
        match self {
            Pending::All(events) => events.len(),
            Pending::LatestPerSource(latest) => latest.len(),
        }
    }
}

/// Accumulates accepted events and decides when they must be flushed.
///
/// The buffer itself never publishes; the run loop polls [`should_flush`]
/// and calls [`drain`] when it reports `true`.
///
/// [`should_flush`]: EventBuffer::should_flush
/// [`drain`]: EventBuffer::drain
///
/// # Example
/// ```
/// use std::time::Duration;
/// use ble_gateway::buffer::{BufferPolicy, EventBuffer};
///
/// let buffer = EventBuffer::new(BufferPolicy {
///     flush_interval: Duration::from_secs(5),
///     max_batch_size: 100,
///     throttle: true,
/// });
/// assert!(!buffer.should_flush());
/// ```
#[derive(Debug)]
pub struct EventBuffer {
    policy: BufferPolicy,
    pending: Pending,
    last_flush: Instant,
}

impl EventBuffer {
    /// Create a buffer for the given policy.
    ///
    /// Throttling needs a window to collapse events within, so the
    /// `LatestPerSource` storage is only selected when the policy combines
    /// throttling with a non-zero flush interval.
    pub fn new(policy: BufferPolicy) -> Self {
        let pending = if policy.throttle && !policy.flush_interval.is_zero() {
            Pending::LatestPerSource(HashMap::new())
        } else {
            Pending::All(Vec::new())
        };
        EventBuffer {
            policy,
            pending,
            last_flush: Instant::now(),
        }
    }

    /// Whether the buffer flushes as soon as anything is pending.
    pub fn is_immediate(&self) -> bool {
        self.policy.flush_interval.is_zero()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.len() == 0
    }

    /// Add an accepted event.
    ///
    /// When throttling, a pending event from the same source address is
    /// replaced; the arrival never grows the buffer past one entry per
    /// device.
    pub fn add(&mut self, event: AdvertisementEvent) {
        match &mut self.pending {
            Pending::All(events) => events.push(event),
            Pending::LatestPerSource(latest) => {
                latest.insert(event.source_address, event);
            }
        }
    }

    /// Whether pending events must be flushed now.
    ///
    /// Immediate mode flushes whenever the buffer is non-empty. Windowed
    /// mode flushes when the batch-size cap is reached, or when the flush
    /// interval has elapsed and at least one event is pending. An empty
    /// buffer never flushes, so an idle window publishes nothing.
    pub fn should_flush(&self) -> bool {
        let pending = self.pending.len();
        if self.is_immediate() {
            return pending > 0;
        }
        if pending >= self.policy.max_batch_size {
            return true;
        }
        pending > 0 && self.last_flush.elapsed() >= self.policy.flush_interval
    }

    /// Take all pending events, leaving the buffer empty.
    ///
    /// The flush timer is reset even when nothing was pending, so the next
    /// window is measured from the most recent drain.
    pub fn drain(&mut self) -> Vec<AdvertisementEvent> {
        self.last_flush = Instant::now();
        match &mut self.pending {
            Pending::All(events) => std::mem::take(events),
            Pending::LatestPerSource(latest) => std::mem::take(latest).into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, base_event};

    const OTHER_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    fn windowed(interval: Duration, max_batch_size: usize, throttle: bool) -> EventBuffer {
        EventBuffer::new(BufferPolicy {
            flush_interval: interval,
            max_batch_size,
            throttle,
        })
    }

    #[test]
    fn test_immediate_mode_flushes_when_non_empty() {
        let mut buffer = EventBuffer::new(BufferPolicy::default());
        assert!(buffer.is_immediate());
        assert!(!buffer.should_flush());

        buffer.add(base_event(TEST_MAC, 1));
        assert!(buffer.should_flush());
    }

    #[test]
    fn test_immediate_mode_preserves_arrival_order() {
        // Throttling is requested but immediate mode overrides it.
        let mut buffer = windowed(Duration::ZERO, 100, true);

        buffer.add(base_event(TEST_MAC, 1));
        buffer.add(base_event(TEST_MAC, 2));
        buffer.add(base_event(OTHER_MAC, 3));

        let drained = buffer.drain();
        let timestamps: Vec<u64> = drained.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(timestamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let mut buffer = EventBuffer::new(BufferPolicy::default());
        buffer.add(base_event(TEST_MAC, 1));
        assert_eq!(buffer.len(), 1);

        assert_eq!(buffer.drain().len(), 1);
        assert!(buffer.is_empty());
        assert!(!buffer.should_flush());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_windowed_mode_holds_events_within_interval() {
        let mut buffer = windowed(Duration::from_secs(3600), 100, false);
        buffer.add(base_event(TEST_MAC, 1));
        assert!(!buffer.should_flush());
    }

    #[test]
    fn test_windowed_mode_flushes_after_interval() {
        let mut buffer = windowed(Duration::from_millis(20), 100, false);
        buffer.add(base_event(TEST_MAC, 1));
        assert!(!buffer.should_flush());

        std::thread::sleep(Duration::from_millis(25));
        assert!(buffer.should_flush());
    }

    #[test]
    fn test_windowed_mode_empty_buffer_never_flushes() {
        let buffer = windowed(Duration::from_millis(10), 100, false);
        std::thread::sleep(Duration::from_millis(15));
        assert!(!buffer.should_flush());
    }

    #[test]
    fn test_batch_size_cap_forces_flush() {
        let mut buffer = windowed(Duration::from_secs(3600), 3, false);
        buffer.add(base_event(TEST_MAC, 1));
        buffer.add(base_event(TEST_MAC, 2));
        assert!(!buffer.should_flush());

        buffer.add(base_event(TEST_MAC, 3));
        assert!(buffer.should_flush());
    }

    #[test]
    fn test_batch_size_of_one_flushes_every_event() {
        let mut buffer = windowed(Duration::from_secs(3600), 1, false);
        buffer.add(base_event(TEST_MAC, 1));
        assert!(buffer.should_flush());
    }

    #[test]
    fn test_throttle_keeps_latest_event_per_device() {
        let mut buffer = windowed(Duration::from_secs(3600), 100, true);

        let mut first = base_event(TEST_MAC, 1);
        first.signal_strength = -80;
        let mut second = base_event(TEST_MAC, 2);
        second.signal_strength = -40;

        buffer.add(first);
        buffer.add(second);
        assert_eq!(buffer.len(), 1);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].timestamp_ms, 2);
        assert_eq!(drained[0].signal_strength, -40);
    }

    #[test]
    fn test_throttle_tracks_devices_independently() {
        let mut buffer = windowed(Duration::from_secs(3600), 100, true);
        buffer.add(base_event(TEST_MAC, 1));
        buffer.add(base_event(OTHER_MAC, 2));
        buffer.add(base_event(TEST_MAC, 3));

        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_no_throttle_keeps_every_event() {
        let mut buffer = windowed(Duration::from_secs(3600), 100, false);
        buffer.add(base_event(TEST_MAC, 1));
        buffer.add(base_event(TEST_MAC, 2));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].timestamp_ms, 1);
        assert_eq!(drained[1].timestamp_ms, 2);
    }

    #[test]
    fn test_drain_resets_flush_timer() {
        let mut buffer = windowed(Duration::from_millis(30), 100, false);

        std::thread::sleep(Duration::from_millis(35));
        // Drain with nothing pending still restarts the window.
        assert!(buffer.drain().is_empty());

        buffer.add(base_event(TEST_MAC, 1));
        assert!(!buffer.should_flush());

        std::thread::sleep(Duration::from_millis(35));
        assert!(buffer.should_flush());
    }
}
