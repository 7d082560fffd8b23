// Metric name constants for the offline persistence layer.
// Same shape as the agent's metric tables; registered by the agent at startup.

#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    pub description: &'static str,
}

pub const OFFLINE_WRITE_TOTAL: Metric = Metric {
    name: "tsship_offline_write_total",
    description: "Total number of blobs appended to offline files",
};

pub const OFFLINE_WRITE_BYTES_TOTAL: Metric = Metric {
    name: "tsship_offline_write_bytes_total",
    description: "Total compressed bytes appended to offline files",
};

pub const OFFLINE_WRITE_ERRORS_TOTAL: Metric = Metric {
    name: "tsship_offline_write_errors_total",
    description: "Total number of failed offline appends (data dropped)",
};

pub const OFFLINE_FILE_ROLL_TOTAL: Metric = Metric {
    name: "tsship_offline_file_roll_total",
    description: "Total number of offline file rolls (reason={size,drain,manual})",
};

pub const OFFLINE_FILE_DISCARD_TOTAL: Metric = Metric {
    name: "tsship_offline_file_discard_total",
    description: "Total number of offline files discarded at startup as truncated or corrupt",
};

pub const OFFLINE_DRAIN_ENTRIES_TOTAL: Metric = Metric {
    name: "tsship_offline_drain_entries_total",
    description: "Total number of offline entries replayed (result={delivered,rejected,requeued})",
};

pub const OFFLINE_PENDING_ENTRIES: Metric = Metric {
    name: "tsship_offline_pending_entries",
    description: "Entries currently waiting in offline files",
};

pub const COUNTERS: &[Metric] = &[
    OFFLINE_WRITE_TOTAL,
    OFFLINE_WRITE_BYTES_TOTAL,
    OFFLINE_WRITE_ERRORS_TOTAL,
    OFFLINE_FILE_ROLL_TOTAL,
    OFFLINE_FILE_DISCARD_TOTAL,
    OFFLINE_DRAIN_ENTRIES_TOTAL,
];

pub const GAUGES: &[Metric] = &[OFFLINE_PENDING_ENTRIES];
