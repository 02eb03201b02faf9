pub mod error_log;
pub mod rotation;
pub mod store;


pub use error_log::ErrorLog;
pub use rotation::{log_file_name, store_file_name, DailyRotation, RotationAction};
pub use store::{Record, RecordOutcome, RecordStore};
