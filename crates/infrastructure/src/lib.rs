pub mod authentication;
pub mod event_stream;
pub mod in_memory_queue;
pub mod scheduler;
pub mod transport;

pub use authentication::StaticCredentialsProvider;
pub use event_stream::HttpEventStreamClient;
pub use in_memory_queue::{InMemoryQueue, InMemoryQueueProvider};
pub use scheduler::TokioJobScheduler;
pub use transport::HttpTransport;
