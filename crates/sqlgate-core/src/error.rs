use thiserror::Error;

use crate::promotion::PromotionRejection;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Promotion gate refused a production run. Nothing reached the database.
    #[error("rejected: {0}")]
    Rejected(#[from] PromotionRejection),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Rejected(_) => 403,
            Self::InvalidInput(_) => 400,
            Self::Internal(_) => 500,
        }
    }
}
