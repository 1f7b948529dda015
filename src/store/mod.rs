//! Persistence gateways: the metric/command timeseries store and the
//! shared settings/status/lock store.

pub mod state;
pub mod timeseries;

pub use state::{LockHandle, RedisStateStore, SharedStateStore, StateStoreError};
pub use timeseries::{InfluxGateway, MetricCommandStore, TimeseriesError, WriteResults};
