//! Configuration types and loading for the rendezvous barrier service.
//!
//! Settings come from `APP_`-prefixed environment variables with command line
//! overrides layered on top. There are no configuration files.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{ConfigOverrides, LoadConfigError, load_config, load_config_from};
