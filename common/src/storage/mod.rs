pub mod job_store;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory_store;
pub mod redis_store;
pub mod types;
