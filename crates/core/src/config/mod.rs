pub mod agent;
pub mod app_config;
pub mod triggers;

pub use agent::*;
pub use app_config::*;
pub use triggers::*;
