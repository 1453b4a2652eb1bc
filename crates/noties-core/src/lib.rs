pub mod config;
pub mod error;
pub mod ids;
pub mod migrate;
pub mod models;
pub mod paths;

// Re-export commonly used types and functions
pub use config::{Config, DEFAULT_SCOPE};
pub use error::{PathError, SchemaError};
pub use migrate::migrate_note;
pub use models::{sorted_notes, Block, ChecklistItem, DayPlan, Note, NotePatch};
pub use paths::{Collection, StorePath};
