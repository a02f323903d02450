use disk::DiskError;
use memory::MmuError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("virtual memory is already started")]
    AlreadyStarted,
    #[error("virtual memory is not started")]
    NotStarted,
    #[error("out of swap space")]
    OutOfSwap,
    #[error("{op} failed: {source}")]
    Device {
        op: &'static str,
        #[source]
        source: DiskError,
    },
    #[error(transparent)]
    Mmu(#[from] MmuError),
    #[error("could not start pager: {0}")]
    Spawn(#[source] std::io::Error),
    /// The subsystem hit a fatal error and no longer services faults.
    #[error("virtual memory halted: {0}")]
    Halted(String),
}

impl VmError {
    pub(crate) fn device(op: &'static str) -> impl FnOnce(DiskError) -> VmError {
        move |source| VmError::Device { op, source }
    }

    /// Whether this error leaves the subsystem unable to make progress.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::OutOfSwap | VmError::Device { .. } | VmError::Mmu(_) | VmError::Halted(_)
        )
    }
}
