//! Write-ahead logging: the ARIES-style durability layer.

pub mod log_manager;
pub mod log_record;
pub mod recovery;

pub use log_manager::LogManager;
pub use log_record::{CompensatingAction, LogRecord, LogRecordBody, INVALID_LSN};
pub use recovery::{recover, undo_one_record};
