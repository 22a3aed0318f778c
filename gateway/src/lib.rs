pub mod admin;
pub mod api;
pub mod dedup;
pub mod endpoint;
pub mod limiter;
pub mod payload;
pub mod router;
pub mod signature;

pub use dedup::DuplicateDetector;
pub use limiter::RateLimiter;
pub use router::{router, AppState};
