pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod interceptor;
pub mod logger;
pub mod monitor;
pub mod report;
pub mod stats;

// Re-export commonly used types
pub use bus::Subscription;
pub use config::{ConfigLoader, MonitorConfig};
pub use error::{NetmonError, Result};
pub use history::{
    BodySnapshot, CallStyle, ErrorKind, LifecycleState, RecordError, RequestRecord, Snapshot,
    StatusClass,
};
pub use http::{EventedRequest, InstrumentedClient};
pub use interceptor::{EventedCall, Instrumented, InstrumentedCall, observe};
pub use monitor::{ExportDocument, NetworkMonitor, global};
pub use stats::{EndpointAggregate, Percentiles, RequestFilter, StatsSummary};
