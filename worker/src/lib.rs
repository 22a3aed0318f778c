pub mod filters;
pub mod pool;
pub mod retry;
pub mod sinks;
pub mod transform;

pub use pool::{PipelineContext, RequeueHandle, WorkSource, WorkerPool};
pub use retry::RetryPolicy;
