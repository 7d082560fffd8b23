#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    pub description: &'static str,
}

pub const COUNTERS: [Metric; 9] = [
    SHIPPER_BATCHES_SENT_TOTAL,
    SHIPPER_BATCHES_BUFFERED_TOTAL,
    SHIPPER_BATCHES_DROPPED_TOTAL,
    SHIPPER_POINTS_SUCCESS_TOTAL,
    SHIPPER_POINTS_FAILED_TOTAL,
    SHIPPER_BAD_CONTENT_TOTAL,
    SHIPPER_RETRIES_TOTAL,
    CONNECTIVITY_TRANSITIONS_TOTAL,
    CONNECTIVITY_PROBES_TOTAL,
];
pub const GAUGES: [Metric; 2] = [CONNECTIVITY_UP, SHIPPER_COMPRESSION_ENABLED];
pub const HISTOGRAMS: [Metric; 2] = [SHIPPER_SEND_LATENCY_MS, SHIPPER_BATCH_POINTS];

// SHIPPER Metrics --------------------------

pub const SHIPPER_BATCHES_SENT_TOTAL: Metric = Metric {
    name: "tsship_shipper_batches_sent_total",
    description: "Total number of batches posted to the ingestion endpoint",
};

pub const SHIPPER_BATCHES_BUFFERED_TOTAL: Metric = Metric {
    name: "tsship_shipper_batches_buffered_total",
    description: "Total number of batches handed to offline storage instead of the network",
};

pub const SHIPPER_BATCHES_DROPPED_TOTAL: Metric = Metric {
    name: "tsship_shipper_batches_dropped_total",
    description: "Total number of batches lost because offline storage was unavailable",
};

pub const SHIPPER_POINTS_SUCCESS_TOTAL: Metric = Metric {
    name: "tsship_shipper_points_success_total",
    description: "Total number of datapoints accepted by the endpoint",
};

pub const SHIPPER_POINTS_FAILED_TOTAL: Metric = Metric {
    name: "tsship_shipper_points_failed_total",
    description: "Total number of datapoints refused by the endpoint",
};

pub const SHIPPER_BAD_CONTENT_TOTAL: Metric = Metric {
    name: "tsship_shipper_bad_content_total",
    description: "Total number of batches rejected as a whole (not retried)",
};

pub const SHIPPER_RETRIES_TOTAL: Metric = Metric {
    name: "tsship_shipper_retries_total",
    description: "Total number of send retries after transient failures",
};

pub const SHIPPER_COMPRESSION_ENABLED: Metric = Metric {
    name: "tsship_shipper_compression_enabled",
    description: "Whether request bodies are gzip compressed (0=no,1=yes)",
};

pub const SHIPPER_SEND_LATENCY_MS: Metric = Metric {
    name: "tsship_shipper_send_latency_ms",
    description: "Latency of a single batch POST in milliseconds",
};

pub const SHIPPER_BATCH_POINTS: Metric = Metric {
    name: "tsship_shipper_batch_points",
    description: "Number of datapoints per flushed batch",
};

// CONNECTIVITY Metrics --------------------------

pub const CONNECTIVITY_UP: Metric = Metric {
    name: "tsship_connectivity_up",
    description: "Endpoint reachability as seen by the agent (0=down,1=up)",
};

pub const CONNECTIVITY_TRANSITIONS_TOTAL: Metric = Metric {
    name: "tsship_connectivity_transitions_total",
    description: "Total number of connectivity events (event={connected,reconnected,disconnected})",
};

pub const CONNECTIVITY_PROBES_TOTAL: Metric = Metric {
    name: "tsship_connectivity_probes_total",
    description: "Total number of health probes (result={ok,fail})",
};
