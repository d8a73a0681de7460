pub mod env;
pub mod tracing_init;

pub use env::{AppConfig, DbSettings, PoolSettings};
pub use tracing_init::init_tracing;
