//! Core gateway loop (business logic) for `ble-gateway`.
//!
//! This module is intentionally decoupled from CLI parsing, transport setup
//! and process exit codes so it can be tested deterministically.

use crate::advertisement::AdvertisementEvent;
use crate::buffer::{BufferPolicy, EventBuffer};
use crate::filter::{AcceptanceFilter, FilterCriteria};
use crate::mac_address::MacAddress;
use crate::mqtt::PublishSink;
use crate::output::EventFormatter;
use crate::output::gprp::GprpFormatter;
use crate::output::json::JsonFormatter;
use crate::scanner::{Backend, ScanConfig, ScanError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Flush poll cadence when the buffer publishes immediately.
const FLUSH_CHECK_INTERVAL_IMMEDIATE: Duration = Duration::from_millis(100);

/// Flush poll cadence when the buffer collects a window. The window itself
/// controls batch timing; this only bounds how late a due flush can start.
const FLUSH_CHECK_INTERVAL_BUFFERED: Duration = Duration::from_secs(1);

/// How often the running counters are logged.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Cumulative counters for one gateway run. Never reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// Events that passed the acceptance filter.
    pub seen: u64,
    /// Events rejected by the acceptance filter.
    pub filtered: u64,
    /// Events handed to the buffer.
    pub buffered: u64,
    /// Payloads the sink accepted.
    pub published: u64,
    /// Events lost to encoding faults or sink failures.
    pub publish_errors: u64,
    /// Non-empty drains.
    pub flushes: u64,
}

impl std::fmt::Display for Counters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seen={} filtered={} buffered={} published={} errors={} flushes={}",
            self.seen, self.filtered, self.buffered, self.published, self.publish_errors, self.flushes
        )
    }
}

/// Errors returned by the core gateway loop.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        config: ScanConfig,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<mpsc::Receiver<AdvertisementEvent>, ScanError>> + Send + '_,
        >,
    >;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        config: ScanConfig,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<mpsc::Receiver<AdvertisementEvent>, ScanError>> + Send + '_,
        >,
    > {
        Box::pin(async move { crate::scanner::start_scan(backend, config).await })
    }
}

/// Everything the run loop needs, resolved from config and CLI beforehand.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub policy: BufferPolicy,
    pub criteria: FilterCriteria,
    pub gateway_mac: MacAddress,
    pub topic: String,
    pub backend: Backend,
    pub scan: ScanConfig,
}

/// Render each event and hand it to the sink, one publish per event.
///
/// An event that fails to render is dropped and counted; it must not take
/// the rest of the batch down with it.
async fn publish_batch(
    events: Vec<AdvertisementEvent>,
    formatter: &dyn EventFormatter,
    sink: &mut dyn PublishSink,
    counters: &mut Counters,
) {
    for event in events {
        let payload = match formatter.format(&event) {
            Ok(payload) => payload,
            Err(e) => {
                counters.publish_errors += 1;
                error!("Dropping event from {}: {e}", event.source_address);
                continue;
            }
        };
        match sink.publish(payload).await {
            Ok(()) => counters.published += 1,
            Err(e) => {
                counters.publish_errors += 1;
                warn!("Publish failed for {}: {e}", event.source_address);
            }
        }
    }
}

/// Run the gateway loop until cancelled or the scan source closes.
///
/// Events flow scan source -> acceptance filter -> buffer; a periodic poll
/// drains the buffer when its policy says so and publishes each drained
/// event in the CSV envelope format. On shutdown the loop performs one
/// final unconditional drain and publishes the remainder as full JSON
/// records, keeping maximal detail for whatever was still in flight.
///
/// # Returns
/// The cumulative counters for the run.
pub async fn run(
    settings: GatewaySettings,
    scanner: &dyn Scanner,
    sink: &mut dyn PublishSink,
    cancel: CancellationToken,
) -> Result<Counters, GatewayError> {
    let filter = AcceptanceFilter::new(settings.criteria);
    let mut buffer = EventBuffer::new(settings.policy);
    let mut counters = Counters::default();

    let mut events = scanner.start_scan(settings.backend, settings.scan).await?;
    info!(
        "Scanning on backend '{}', publishing to '{}'",
        settings.backend, settings.topic
    );
    let envelope = GprpFormatter::new(settings.gateway_mac, settings.topic);

    let cadence = if buffer.is_immediate() {
        FLUSH_CHECK_INTERVAL_IMMEDIATE
    } else {
        FLUSH_CHECK_INTERVAL_BUFFERED
    };
    let mut flush_tick = tokio::time::interval(cadence);
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats_tick =
        tokio::time::interval_at(tokio::time::Instant::now() + STATS_LOG_INTERVAL, STATS_LOG_INTERVAL);
    stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    warn!("Scan source closed, shutting down");
                    break;
                };
                if filter.accept(&event) {
                    counters.seen += 1;
                    buffer.add(event);
                    counters.buffered += 1;
                } else {
                    counters.filtered += 1;
                }
            }
            _ = flush_tick.tick() => {
                if buffer.should_flush() {
                    let batch = buffer.drain();
                    if !batch.is_empty() {
                        counters.flushes += 1;
                        publish_batch(batch, &envelope, sink, &mut counters).await;
                    }
                }
            }
            _ = stats_tick.tick() => {
                debug!("{counters} pending={}", buffer.len());
            }
        }
    }

    // Final drain: whatever is still pending goes out as full JSON records.
    let remainder = buffer.drain();
    if !remainder.is_empty() {
        info!("Draining {} buffered event(s) on shutdown", remainder.len());
        counters.flushes += 1;
        publish_batch(remainder, &JsonFormatter, sink, &mut counters).await;
    }

    Ok(counters)
}
