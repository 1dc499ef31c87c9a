pub mod remote_event;
pub mod scheduled;

pub use remote_event::{ReconnectPolicy, RemoteEventDistributionTrigger};
pub use scheduled::ScheduledDistributionTrigger;
