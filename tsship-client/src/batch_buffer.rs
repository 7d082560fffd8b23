use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tsship_core::Datapoint;

/// A flushed batch: a JSON array of datapoint objects, ready to POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub body: Vec<u8>,
    pub points: usize,
}

#[derive(Debug, Default)]
struct Pending {
    body: Vec<u8>,
    points: usize,
    opened_at: Option<Instant>,
}

impl Pending {
    fn seal(&mut self) -> Batch {
        self.body.push(b']');
        let batch = Batch {
            body: std::mem::take(&mut self.body),
            points: self.points,
        };
        self.points = 0;
        self.opened_at = None;
        batch
    }
}

/// Accumulates rendered datapoints until a size or age threshold is hit.
///
/// Rendering happens before the lock is taken; the lock covers only the append and the
/// swap for a fresh buffer, so producers never wait on a send.
#[derive(Debug)]
pub struct BatchBuffer {
    size_threshold: usize,
    time_threshold: Duration,
    pending: Mutex<Pending>,
}

impl BatchBuffer {
    pub fn new(size_threshold: usize, time_threshold: Duration) -> Self {
        Self {
            size_threshold: size_threshold.max(1),
            time_threshold,
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Append one datapoint; returns the sealed batch when this push filled it.
    pub fn push(&self, datapoint: &Datapoint) -> Option<Batch> {
        let mut rendered = Vec::with_capacity(128);
        datapoint.render(&mut rendered);

        let mut pending = self.pending.lock();
        if pending.points == 0 {
            pending.body.push(b'[');
            pending.opened_at = Some(Instant::now());
        } else {
            pending.body.push(b',');
        }
        pending.body.extend_from_slice(&rendered);
        pending.points += 1;

        (pending.points >= self.size_threshold).then(|| pending.seal())
    }

    /// Seal the buffer if its first point is older than the time threshold.
    pub fn take_if_aged(&self) -> Option<Batch> {
        let mut pending = self.pending.lock();
        match pending.opened_at {
            Some(opened) if pending.points > 0 && opened.elapsed() >= self.time_threshold => {
                Some(pending.seal())
            }
            _ => None,
        }
    }

    /// Seal whatever is buffered, regardless of thresholds.
    pub fn take(&self) -> Option<Batch> {
        let mut pending = self.pending.lock();
        (pending.points > 0).then(|| pending.seal())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().points
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn time_threshold(&self) -> Duration {
        self.time_threshold
    }
}
