pub mod bar_store;
pub mod freshness;
pub mod resampler;
pub mod window;

pub use bar_store::{BarStore, SqliteBarStore};
pub use freshness::{Coverage, FreshnessGuard};
pub use resampler::resample;
pub use window::WindowSelector;
