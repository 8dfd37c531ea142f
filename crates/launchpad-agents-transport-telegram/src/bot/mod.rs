/// Rejected-sender flood protection
pub mod rejection_cache;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;

pub use rejection_cache::RejectionCache;
