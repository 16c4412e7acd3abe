use super::SwapId;

/// Errors surfaced to gateway callers.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("requested amount {requested_sat} sat is below the minimum of {minimum_sat} sat")]
    RejectedTooSmall { requested_sat: u64, minimum_sat: u64 },

    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),

    #[error("swap not found: {0}")]
    NotFound(SwapId),

    #[error("backend unavailable: {0:#}")]
    BackendUnavailable(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SwapError {
    /// Validation failures are reported synchronously and never create a record.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SwapError::RejectedTooSmall { .. } | SwapError::InvalidInvoice(_)
        )
    }
}
