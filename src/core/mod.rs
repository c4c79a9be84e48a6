//! 核心层：错误类型与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{MemoryError, ProviderError};
pub use shutdown::{
    ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason, StoreFlushCleanup,
};
