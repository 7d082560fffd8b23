use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tsship_client::{MetricIdentity, Pipeline, PipelineStats, Result};

use crate::agent_metrics::{AGENT_TICKS_TOTAL, AGENT_UPTIME_SECONDS};

/// Ships the agent's own health as regular datapoints through its pipeline, then ticks the
/// pipeline so partial batches leave on schedule.
pub(crate) struct SelfCollector {
    pipeline: Arc<Pipeline>,
    started: Instant,
    uptime: Arc<MetricIdentity>,
    batches_sent: Arc<MetricIdentity>,
    batches_buffered: Arc<MetricIdentity>,
    batches_dropped: Arc<MetricIdentity>,
    points_success: Arc<MetricIdentity>,
    points_failed: Arc<MetricIdentity>,
    bad_content: Arc<MetricIdentity>,
    offline_pending: Arc<MetricIdentity>,
    identities: Arc<MetricIdentity>,
    connected: Arc<MetricIdentity>,
}

impl SelfCollector {
    pub(crate) const SERIES: usize = 10;

    pub(crate) fn new(pipeline: Arc<Pipeline>, host: &str) -> Result<Self> {
        let tags = [("host", host)];
        Ok(SelfCollector {
            uptime: pipeline.intern("tsship.agent.uptime", tags)?,
            batches_sent: pipeline.intern("tsship.agent.batches.sent", tags)?,
            batches_buffered: pipeline.intern("tsship.agent.batches.buffered", tags)?,
            batches_dropped: pipeline.intern("tsship.agent.batches.dropped", tags)?,
            points_success: pipeline.intern("tsship.agent.points.success", tags)?,
            points_failed: pipeline.intern("tsship.agent.points.failed", tags)?,
            bad_content: pipeline.intern("tsship.agent.bad_content", tags)?,
            offline_pending: pipeline.intern("tsship.agent.offline.pending", tags)?,
            identities: pipeline.intern("tsship.agent.identities", tags)?,
            connected: pipeline.intern("tsship.agent.connected", tags)?,
            started: Instant::now(),
            pipeline,
        })
    }

    /// Record one sample per self series, all stamped with the same timestamp.
    pub(crate) fn record_self_metrics(&self) -> Result<()> {
        let PipelineStats {
            shipper,
            pending_offline_entries,
            identities,
            connected,
            ..
        } = self.pipeline.stats();
        let ts = self.pipeline.timestamp_now();
        let uptime = self.started.elapsed().as_secs();

        self.pipeline.record(&self.uptime, ts, uptime)?;
        self.pipeline.record(&self.batches_sent, ts, shipper.sent_batches)?;
        self.pipeline.record(&self.batches_buffered, ts, shipper.buffered_batches)?;
        self.pipeline.record(&self.batches_dropped, ts, shipper.dropped_batches)?;
        self.pipeline.record(&self.points_success, ts, shipper.success)?;
        self.pipeline.record(&self.points_failed, ts, shipper.failed)?;
        self.pipeline.record(&self.bad_content, ts, shipper.bad_content)?;
        self.pipeline.record(&self.offline_pending, ts, pending_offline_entries)?;
        self.pipeline.record(&self.identities, ts, identities)?;
        self.pipeline.record(&self.connected, ts, connected as i64)?;

        metrics::gauge!(AGENT_UPTIME_SECONDS.name).set(uptime as f64);
        Ok(())
    }

    pub(crate) fn start(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                metrics::counter!(AGENT_TICKS_TOTAL.name).increment(1);
                if let Err(e) = self.record_self_metrics() {
                    warn!(target = "self_collector", error = %e, "failed to record self metrics");
                    continue;
                }
                if let Some(outcome) = self.pipeline.tick().await {
                    debug!(target = "self_collector", ?outcome, "tick flushed pending batch");
                }
            }
        })
    }
}
