pub mod types;
pub mod error;
pub mod config;
pub mod utils;
pub mod upstream;
pub mod data;
pub mod chart;
pub mod ingest;

pub use types::*;
pub use error::{CacheError, Result};
