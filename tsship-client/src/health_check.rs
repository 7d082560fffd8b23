use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, trace};

use crate::connectivity::Connectivity;
use crate::errors::Result;
use crate::options::ShipperOptions;
use crate::shipper_metrics::CONNECTIVITY_PROBES_TOTAL;

// HealthProbe checks that the ingestion endpoint answers on its version path.
// It runs on its own schedule with its own (shorter) timeouts, so a stalled data send
// never delays detecting that the endpoint came back.
#[derive(Debug)]
pub struct HealthProbe {
    http: reqwest::Client,
    url: reqwest::Url,
    connectivity: Arc<Connectivity>,
}

impl HealthProbe {
    pub fn new(options: &ShipperOptions, connectivity: Arc<Connectivity>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(options.probe_connect_timeout())
            .timeout(options.probe_request_timeout())
            .build()?;
        Ok(Self {
            http,
            url: options.version_url()?,
            connectivity,
        })
    }

    /// One GET against the version path; any 2xx is healthy. Feeds the outcome to
    /// `Connectivity` and returns it.
    pub async fn probe(&self) -> bool {
        let healthy = match self.http.get(self.url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(target = "health_check", url = %self.url, status = resp.status().as_u16(), "probe answered with non-success status");
                false
            }
            Err(e) => {
                debug!(target = "health_check", url = %self.url, error = %e, "probe failed");
                false
            }
        };

        if healthy {
            metrics::counter!(CONNECTIVITY_PROBES_TOTAL.name, "result" => "ok").increment(1);
            self.connectivity.record_success();
        } else {
            metrics::counter!(CONNECTIVITY_PROBES_TOTAL.name, "result" => "fail").increment(1);
            self.connectivity.record_failure();
        }
        trace!(target = "health_check", healthy, "probe done");
        healthy
    }

    /// Probe immediately, then every `period`, until `stop` turns true.
    pub fn start(self: Arc<Self>, period: Duration, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        self.probe().await;
                    }
                }
            }
        })
    }
}
