use thiserror::Error;

use crate::catalog::{ChipId, IfaceType};

/// Status reported by a hardware call that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    #[error("hardware service not available")]
    NotAvailable,

    #[error("hardware service not started")]
    NotStarted,

    #[error("object '{0}' does not exist")]
    NotExists(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("operation not supported")]
    NotSupported,

    #[error("hardware busy")]
    Busy,

    #[error("hardware call failed: {0}")]
    Unknown(String),
}

impl HalError {
    /// Only "not available" is worth retrying; every other status is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, HalError::NotAvailable)
    }

    /// The object the call referred to is already gone.
    pub fn is_absent(&self) -> bool {
        matches!(self, HalError::NotExists(_) | HalError::InvalidArgs(_))
    }
}

pub type HalResult<T> = std::result::Result<T, HalError>;

#[derive(Error, Debug)]
pub enum RadioManagerError {
    #[error("radio service is not started")]
    NotStarted,

    #[error("no chip supports {0} interfaces")]
    Unsupported(IfaceType),

    #[error("no feasible allocation for a {0} interface")]
    NoFeasiblePlan(IfaceType),

    #[error("registry out of sync with chip {chip}: {iface_type} interface '{name}' is missing")]
    Desync {
        chip: ChipId,
        iface_type: IfaceType,
        name: String,
    },

    #[error("{op} failed: {source}")]
    Hardware {
        op: &'static str,
        #[source]
        source: HalError,
    },

    #[error("chip {0} not found")]
    UnknownChip(ChipId),
}

impl RadioManagerError {
    pub fn hardware(op: &'static str, source: HalError) -> Self {
        RadioManagerError::Hardware { op, source }
    }

    /// Whether this failure means the registry can no longer be trusted.
    pub fn is_desync(&self) -> bool {
        matches!(self, RadioManagerError::Desync { .. })
    }
}

pub type Result<T> = std::result::Result<T, RadioManagerError>;
