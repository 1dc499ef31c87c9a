pub mod agent;
pub mod authorization;
pub mod factory;
pub mod retry;
pub mod strategies;
pub mod triggers;

pub use agent::{AgentComponents, DistributionResponse, QueuedItem, SimpleDistributionAgent};
pub use authorization::{
    authorization_strategy_from_config, AllowAllAuthorizationStrategy,
    PathPrivilegeAuthorizationStrategy,
};
pub use factory::{AgentRegistry, DistributionAgentFactory};
pub use retry::RetryPolicy;
pub use strategies::{
    dispatching_strategy_from_config, MultipleQueueDispatchingStrategy,
    PathPrefixDispatchingStrategy, SingleQueueDispatchingStrategy,
};
pub use triggers::{ReconnectPolicy, RemoteEventDistributionTrigger, ScheduledDistributionTrigger};
