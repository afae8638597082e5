pub mod settings;

pub use settings::{
    ConsolidationConfig, RetentionConfig, StorageConfig, TraceMemoryConfig, CONFIG_FILE,
};
