// externally visible interfaces
pub mod bus_publisher;
pub mod device;
pub mod error;
pub mod installation_config;
pub mod metric_collector;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod passhash;
pub mod poller;
pub mod publication;
pub mod shutdown;
pub mod solarman_api;
pub mod telemetry;

pub use error::{Error, Result};
