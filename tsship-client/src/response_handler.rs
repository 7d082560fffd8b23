use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// Per-point errors worth logging from one detailed response.
const MAX_LOGGED_POINT_ERRORS: usize = 10;

// Substrings of a 400 message that mean the endpoint could not read a compressed body.
const COMPRESSION_FAILURE_HINTS: [&str; 5] = ["parse", "encoding", "compress", "gzip", "multibyte"];

/// How much of the endpoint's answer to a POST is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Status code only.
    Ignore,
    /// `{"failed": n, "success": n}`
    #[default]
    Summary,
    /// Summary plus `"errors": [{"datapoint": {...}, "error": "..."}]`
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// The endpoint took the batch; `failed` points may still have been refused.
    Accepted,
    /// The endpoint refused the batch; never retried, never buffered.
    Rejected,
    /// Worth retrying, then buffering.
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseVerdict {
    pub failed: u64,
    pub success: u64,
    pub class: ResponseClass,
    /// The endpoint could not decode a compressed body; send plain JSON from now on.
    pub disable_compression: bool,
}

impl ResponseVerdict {
    fn new(class: ResponseClass, failed: u64, success: u64) -> Self {
        Self {
            failed,
            success,
            class,
            disable_compression: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryBody {
    failed: u64,
    success: u64,
}

#[derive(Debug, Deserialize)]
struct DetailedBody {
    #[serde(default)]
    errors: Vec<PointError>,
    failed: u64,
    success: u64,
}

#[derive(Debug, Deserialize)]
struct PointError {
    #[serde(default)]
    datapoint: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

impl ResponseMode {
    /// Classify one response to a batch of `points` datapoints.
    pub fn process(self, status: u16, body: &[u8], points: usize, compressed: bool) -> ResponseVerdict {
        let points = points as u64;
        match status {
            200..=299 => match self.parse_counts(body) {
                Some((failed, success)) => {
                    ResponseVerdict::new(ResponseClass::Accepted, failed, success)
                }
                None => ResponseVerdict::new(ResponseClass::Accepted, 0, points),
            },
            400..=499 => {
                let (failed, success) = self.parse_counts(body).unwrap_or((points, 0));
                let mut verdict = ResponseVerdict::new(ResponseClass::Rejected, failed, success);
                if self == ResponseMode::Detailed
                    && compressed
                    && status == 400
                    && !has_point_errors(body)
                    && mentions_compression_failure(body)
                {
                    warn!(target = "response_handler", status, "endpoint could not decode compressed body; disabling compression");
                    verdict.disable_compression = true;
                }
                verdict
            }
            500..=599 => match self.parse_counts(body) {
                Some((failed, success)) => {
                    ResponseVerdict::new(ResponseClass::Rejected, failed, success)
                }
                None => ResponseVerdict::new(ResponseClass::Transient, 0, 0),
            },
            _ => ResponseVerdict::new(ResponseClass::Transient, 0, 0),
        }
    }

    fn parse_counts(self, body: &[u8]) -> Option<(u64, u64)> {
        match self {
            ResponseMode::Ignore => None,
            ResponseMode::Summary => serde_json::from_slice::<SummaryBody>(body)
                .ok()
                .map(|b| (b.failed, b.success)),
            ResponseMode::Detailed => {
                let parsed = serde_json::from_slice::<DetailedBody>(body).ok()?;
                for e in parsed.errors.iter().take(MAX_LOGGED_POINT_ERRORS) {
                    debug!(
                        target = "response_handler",
                        datapoint = %e.datapoint,
                        error = e.error.as_deref().unwrap_or("unspecified"),
                        "endpoint refused datapoint"
                    );
                }
                Some((parsed.failed, parsed.success))
            }
        }
    }
}

fn has_point_errors(body: &[u8]) -> bool {
    serde_json::from_slice::<DetailedBody>(body)
        .map(|b| !b.errors.is_empty())
        .unwrap_or(false)
}

fn mentions_compression_failure(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body).to_ascii_lowercase();
    COMPRESSION_FAILURE_HINTS.iter().any(|hint| text.contains(hint))
}
