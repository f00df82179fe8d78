//! Build information baked in at compile time.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const REVISION: Option<&str> = option_env!("TRACKER_REVISION");

pub const BUILD_TIMESTAMP: Option<&str> = option_env!("TRACKER_BUILD_TIMESTAMP");

pub const NAME: &str = "intern-tracker";
