use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::shipper_metrics::{CONNECTIVITY_TRANSITIONS_TOTAL, CONNECTIVITY_UP};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// First successful contact since the process started.
    Connected,
    /// Up again after having been down.
    Reconnected,
    Disconnected,
}

impl ConnectivityEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityEvent::Connected => "connected",
            ConnectivityEvent::Reconnected => "reconnected",
            ConnectivityEvent::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-state view of the ingestion endpoint: down (hard-down, buffer only) or up.
///
/// Fed by the health probe and by live sends. Every transition is a single
/// compare-and-set on `down`, so a probe and a send racing on the same outcome fire
/// at most one event between them.
#[derive(Debug)]
pub struct Connectivity {
    down: AtomicBool,
    ever_connected: AtomicBool,
    consecutive_successes: AtomicU64,
    consecutive_failures: AtomicU64,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity {
    /// Starts down and never connected; the first successful probe fires `Connected`.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        metrics::gauge!(CONNECTIVITY_UP.name).set(0.0);
        Self {
            down: AtomicBool::new(true),
            ever_connected: AtomicBool::new(false),
            consecutive_successes: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            events,
        }
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::Acquire)
    }

    pub fn consecutive_successes(&self) -> u64 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    pub fn record_success(&self) -> Option<ConnectivityEvent> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.fetch_add(1, Ordering::Relaxed);
        self.transition_up()
    }

    pub fn record_failure(&self) -> Option<ConnectivityEvent> {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.transition_down()
    }

    /// Enter hard-down without touching the outcome counters.
    pub fn force_down(&self) -> Option<ConnectivityEvent> {
        self.transition_down()
    }

    pub fn force_up(&self) -> Option<ConnectivityEvent> {
        self.transition_up()
    }

    fn transition_up(&self) -> Option<ConnectivityEvent> {
        if self
            .down
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let event = if self.ever_connected.swap(true, Ordering::AcqRel) {
            ConnectivityEvent::Reconnected
        } else {
            ConnectivityEvent::Connected
        };
        metrics::gauge!(CONNECTIVITY_UP.name).set(1.0);
        info!(target = "connectivity", %event, "ingestion endpoint is up");
        self.publish(event);
        Some(event)
    }

    fn transition_down(&self) -> Option<ConnectivityEvent> {
        if self
            .down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let event = ConnectivityEvent::Disconnected;
        metrics::gauge!(CONNECTIVITY_UP.name).set(0.0);
        warn!(target = "connectivity", %event, failures = self.consecutive_failures(), "ingestion endpoint is down; buffering to offline storage");
        self.publish(event);
        Some(event)
    }

    fn publish(&self, event: ConnectivityEvent) {
        metrics::counter!(CONNECTIVITY_TRANSITIONS_TOTAL.name, "event" => event.as_str())
            .increment(1);
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
