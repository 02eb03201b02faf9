pub mod error;
pub mod error_recovery;
pub mod error_utils;
pub mod source;
pub mod triggers;
pub mod types;

pub use error::*;
pub use error_recovery::*;
pub use error_utils::*;
pub use source::*;
pub use triggers::*;
pub use types::*;
