pub mod config;
pub mod error;
pub mod model;
pub mod recorder;
pub mod storage;

pub use config::TraceMemoryConfig;
pub use error::{CoreError, CorruptionPoint};
pub use recorder::TraceRecorder;
pub use storage::{PatternStore, RecoveryScanner, SessionStore};
