pub mod loader;

pub use loader::{load_config, load_config_or_default, load_config_with_source, validate_config, ConfigSource};
