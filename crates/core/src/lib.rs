pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod statistics;
pub mod traits;

pub use errors::{DistributionError, DistributionResult};
pub use models::{DistributionActionType, DistributionItem, DistributionPackage, DistributionRequest};
pub use statistics::{Statistics, StatisticsSnapshot};
