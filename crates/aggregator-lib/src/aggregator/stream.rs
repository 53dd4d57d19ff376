//! Live stream publisher
//!
//! Each subscription is a task that tails completed 15 second windows. A
//! window `[E - 15, E)` is only published once `E <= align_down(now) - 30`,
//! which leaves late merges from slow agents time to land. The task keeps the
//! start of the next window it owes the subscriber, so a late or skipped tick
//! catches up without repeating or skipping windows.

use super::rollup::windows;
use super::store::FlowStore;
use crate::error::FlowError;
use crate::filter::Filter;
use crate::models::{align_down, align_up, resolve_time, FlowResult, BUCKET_WIDTH_SECS};
use crate::observability::StructuredLogger;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::Stream;
use tracing::debug;

/// Windows a bucket must be behind the current one before it is published
const SETTLE_WINDOWS: i64 = 2;

/// Configuration for stream subscriptions
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How often each subscription checks for completed windows (default: 15 seconds)
    pub tick: Duration,
    /// Results buffered per subscriber before the publisher waits
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(BUCKET_WIDTH_SECS as u64),
            channel_capacity: 1024,
        }
    }
}

fn default_interval() -> i64 {
    BUCKET_WIDTH_SECS
}

/// Parameters of a stream subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Earliest window start to publish; negative values are relative to now
    #[serde(default)]
    pub start_time_gte: i64,
    #[serde(default)]
    pub filter: Filter,
    /// Must be exactly 15 seconds
    #[serde(default = "default_interval")]
    pub aggregation_interval: i64,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            start_time_gte: 0,
            filter: Filter::default(),
            aggregation_interval: default_interval(),
        }
    }
}

/// Start of the newest window that is complete enough to publish at `now`
pub fn latest_publishable_window(now: i64) -> i64 {
    align_down(now) - (SETTLE_WINDOWS + 1) * BUCKET_WIDTH_SECS
}

/// Receiving end of a subscription.
///
/// Yields flow results until the server shuts down, which is reported as a
/// final `FlowError::Shutdown`. Dropping it cancels the subscription.
#[derive(Debug)]
pub struct FlowStream {
    rx: mpsc::Receiver<Result<FlowResult, FlowError>>,
}

impl FlowStream {
    pub async fn recv(&mut self) -> Option<Result<FlowResult, FlowError>> {
        self.rx.recv().await
    }
}

impl Stream for FlowStream {
    type Item = Result<FlowResult, FlowError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Decrements the active subscription count when the task ends
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawns and tracks stream subscriptions
#[derive(Debug, Clone)]
pub struct StreamPublisher {
    store: Arc<FlowStore>,
    config: StreamConfig,
    logger: StructuredLogger,
    shutdown: broadcast::Sender<()>,
    active: Arc<AtomicUsize>,
}

impl StreamPublisher {
    pub fn new(
        store: Arc<FlowStore>,
        config: StreamConfig,
        logger: StructuredLogger,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            store,
            config,
            logger,
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open a subscription. Must be called within a tokio runtime.
    pub fn open(&self, request: StreamRequest) -> Result<FlowStream, FlowError> {
        if request.aggregation_interval != BUCKET_WIDTH_SECS {
            return Err(FlowError::InvalidInterval(format!(
                "streams aggregate over exactly {}s, got {}s",
                BUCKET_WIDTH_SECS, request.aggregation_interval
            )));
        }

        let now = self.store.clock().now();
        let start_gte = resolve_time(request.start_time_gte, now);
        let next_window = align_up(start_gte).max(latest_publishable_window(now));

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());

        self.logger.log_stream_opened(next_window, self.active_streams());

        let subscription = Subscription {
            store: self.store.clone(),
            filter: request.filter,
            next_window,
            tx,
        };
        tokio::spawn(subscription.run(
            self.config.tick,
            self.shutdown.subscribe(),
            self.logger.clone(),
            guard,
        ));

        Ok(FlowStream { rx })
    }

    /// Number of subscriptions whose task is still running
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// How a publishing pass ended
enum Published {
    CaughtUp,
    ClientClosed,
    Shutdown,
}

struct Subscription {
    store: Arc<FlowStore>,
    filter: Filter,
    next_window: i64,
    tx: mpsc::Sender<Result<FlowResult, FlowError>>,
}

impl Subscription {
    async fn run(
        mut self,
        tick: Duration,
        mut shutdown: broadcast::Receiver<()>,
        logger: StructuredLogger,
        _guard: ActiveGuard,
    ) {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                _ = ticker.tick() => match self.publish_completed(&mut shutdown).await {
                    Published::CaughtUp => {}
                    Published::ClientClosed => break "client_closed",
                    Published::Shutdown => {
                        self.notify_shutdown();
                        break "shutdown";
                    }
                },
                _ = shutdown.recv() => {
                    self.notify_shutdown();
                    break "shutdown";
                }
                _ = self.tx.closed() => {
                    break "client_closed";
                }
            }
        };

        logger.log_stream_closed(reason, self.next_window);
    }

    /// Deliver the terminal error if the subscriber has room for it.
    ///
    /// A subscriber that stopped reading only sees its stream end.
    fn notify_shutdown(&self) {
        let _ = self.tx.try_send(Err(FlowError::Shutdown));
    }

    /// Send every completed window not yet published.
    ///
    /// A send blocked on a full channel still observes shutdown.
    async fn publish_completed(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Published {
        let latest = latest_publishable_window(self.store.clock().now());
        while self.next_window <= latest {
            let start = self.next_window;
            let end = start + BUCKET_WIDTH_SECS;
            let mut sent = 0usize;
            for snapshot in self.store.scan(start, end, &self.filter) {
                for result in windows(&snapshot, start, BUCKET_WIDTH_SECS) {
                    tokio::select! {
                        delivered = self.tx.send(Ok(result)) => {
                            if delivered.is_err() {
                                return Published::ClientClosed;
                            }
                        }
                        _ = shutdown.recv() => return Published::Shutdown,
                    }
                    sent += 1;
                }
            }
            debug!(window_start = start, flows = sent, "Published stream window");
            self.next_window = end;
        }
        Published::CaughtUp
    }
}
