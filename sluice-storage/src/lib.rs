mod capture;
mod layout;
mod query;
mod schema;
mod sqlite;
mod worker;
#[cfg(test)]
mod capture_test;
#[cfg(test)]
mod sqlite_test;

pub use capture::{
    BodyLimits, CaptureInsertResult, CaptureRecorder, CaptureRequest, CaptureResponse,
    CaptureStore,
};
pub use layout::{CaptureLayout, CapturePaths};
pub use query::{CaptureEntry, CaptureQuery, CaptureSort};
pub use schema::{SchemaCatalog, SchemaError, SchemaSpec, TableSpec};
pub use sqlite::SqliteStore;
pub use worker::{
    CaptureBacklog, CaptureEvent, CaptureWorker, CaptureWorkerConfig, CaptureWorkerHandle,
    CaptureWorkerStats, spawn_capture_worker,
};
