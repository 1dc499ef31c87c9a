pub mod authentication;
pub mod authorization;
pub mod dispatching;
pub mod event_stream;
pub mod queue;
pub mod scheduler;
pub mod transport;
pub mod trigger;

pub use authentication::*;
pub use authorization::*;
pub use dispatching::*;
pub use event_stream::*;
pub use queue::*;
pub use scheduler::*;
pub use transport::*;
pub use trigger::*;
