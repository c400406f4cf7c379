pub mod rate_limiter;
pub mod time;

pub use rate_limiter::Throttle;
pub use time::*;
