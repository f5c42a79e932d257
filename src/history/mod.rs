pub mod model;
pub mod serialization;
pub mod store;

pub use model::{
    BodySnapshot, CallStyle, ErrorKind, LifecycleState, RecordError, RecordId, RecordPatch,
    RequestRecord, StatusClass,
};
pub use store::{HistoryStore, Snapshot, UpdateOutcome};
