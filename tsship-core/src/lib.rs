pub mod datapoint;
pub mod errors;
pub mod identity;
pub mod identity_cache;
pub mod offline_sink;

pub use datapoint::{Datapoint, MetricValue, TimestampUnit};
pub use errors::IdentityError;
pub use identity::MetricIdentity;
pub use identity_cache::{IdentityCache, IdentityCacheConfig};
pub use offline_sink::{DrainReport, OfflineSink, SendOutcome};

#[cfg(test)]
mod identity_test;
#[cfg(test)]
mod identity_cache_test;
