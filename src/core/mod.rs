//! 核心：运行级错误

pub mod error;

pub use error::RunError;
