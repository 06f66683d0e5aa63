use thiserror::Error;

use crate::handle::MethodHandle;

/// Failure to turn a method handle into a descriptor address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("could not convert {0} to a reflected method")]
    ReflectionFailed(MethodHandle),

    #[error("field '{0}' not reachable through metadata lookup or reflection")]
    FieldNotFound(&'static str),

    #[error("engine reported a pending error during {step}")]
    PendingError { step: &'static str },

    #[error("{0} resolved to a null descriptor")]
    NullDescriptor(MethodHandle),
}

/// Failure to discover the descriptor layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("could not find probe owner class")]
    OwnerNotFound,

    #[error("failed to register probe method {0}")]
    RegistrationFailed(String),

    #[error("probe method {0} not found after registration")]
    ProbeMethodMissing(String),

    #[error("failed to resolve probe method: {0}")]
    Resolve(#[from] ResolveError),

    #[error("implementation address {target:#x} not found within {window} bytes of the descriptor")]
    CallTargetNotFound { target: usize, window: usize },

    #[error("compiled entry offset {0} lies outside the scan window")]
    EntryPointOutOfWindow(usize),
}

/// Failure to patch one target method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    #[error("descriptor layout has not been probed")]
    LayoutNotProbed,

    #[error("failed to resolve target method: {0}")]
    Resolve(#[from] ResolveError),

    #[error("field at offset {offset} does not fit a {size}-byte descriptor")]
    OffsetOutOfBounds { offset: usize, size: usize },

    #[error("target {0} was already hooked in this session")]
    AlreadyHooked(MethodHandle),
}

/// Illegal transition of the session state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("layout probing failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("no target could be hooked")]
    NothingHooked,

    #[error("cannot {action} while session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: crate::session::SessionState,
    },
}
