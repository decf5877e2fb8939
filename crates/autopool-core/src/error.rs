//! Error kinds reported by pool operations.
//!
//! None of these are fatal to the controller loop: each one is a local
//! decision reported to the caller or the log.

use thiserror::Error;

use crate::types::InstanceId;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoolError {
    #[error("capacity exceeded: requested {requested} more with {current} live, max is {max}")]
    CapacityExceeded { requested: u32, current: u32, max: u32 },

    #[error("below minimum: removing {requested} of {in_service} in service, min is {min}")]
    BelowMinimum { requested: u32, in_service: u32, min: u32 },

    #[error("resize already in progress for pool {0}")]
    ResizeInProgress(String),

    #[error("insufficient data: {elapsed_periods} of {required} periods available")]
    InsufficientData { elapsed_periods: u64, required: u32 },

    #[error("provisioning failed after {attempts} attempts: {reason}")]
    ProvisioningFailure { attempts: u32, reason: String },

    #[error("health check timed out for {instance} after {timeout_secs}s")]
    HealthCheckTimeout { instance: InstanceId, timeout_secs: u64 },

    #[error("unknown instance: {0}")]
    UnknownInstance(InstanceId),
}

impl PoolError {
    /// Bounds violations are rejected locally without touching any backend.
    pub fn is_bounds_violation(&self) -> bool {
        matches!(
            self,
            PoolError::CapacityExceeded { .. } | PoolError::BelowMinimum { .. }
        )
    }
}
