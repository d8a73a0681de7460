pub mod client;
pub mod models;
pub mod project_sync;
pub mod transform;
