// Library entry point for the CLI and tests
pub mod db;
pub mod error;

pub use db::Database;
pub use error::{CleanupError, CleanupResult};
