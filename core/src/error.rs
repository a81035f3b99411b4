//! Error types for the messaging sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("profile not found: complete onboarding before messaging")]
    ProfileNotFound,

    #[error("no recipient selected")]
    NoRecipient,

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("read receipt failed: {0}")]
    ReadReceiptFailed(String),

    #[error("subscription error: {0}")]
    Subscription(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
