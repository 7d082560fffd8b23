//! tsship-client
//!
//! Library the instrumentation side links against: interns metric identities, batches
//! datapoints, ships them over HTTP and falls back to durable offline storage while the
//! ingestion endpoint is unreachable.

pub mod errors;
pub use errors::{Result, ShipperError};

mod options;
pub use options::ShipperOptions;

mod connectivity;
pub use connectivity::{Connectivity, ConnectivityEvent};

mod health_check;
pub use health_check::HealthProbe;

mod response_handler;
pub use response_handler::{ResponseClass, ResponseMode, ResponseVerdict};

mod retry_manager;
pub use retry_manager::RetryManager;

mod batch_buffer;
pub use batch_buffer::{Batch, BatchBuffer};

mod http_shipper;
pub use http_shipper::{BatchOutcome, HttpShipper, ShipperStats};

mod pipeline;
pub use pipeline::{Pipeline, PipelineStats};

pub mod shipper_metrics;

pub use tsship_core::{MetricIdentity, MetricValue, TimestampUnit};

#[cfg(test)]
mod batch_buffer_test;
