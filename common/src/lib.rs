pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod storage;
pub mod utils;
