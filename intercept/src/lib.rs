//! artpatch-intercept: ArtMethod layout probing and in-place patching.
//!
//! Redirects a JNI native method by rewriting the runtime's own method
//! descriptor instead of patching code: `data_` is pointed at an interceptor,
//! the quick-code entry at the generic JNI trampoline, and the fast-path
//! access flags are stripped.

pub mod descriptor;
pub mod engine;
pub mod error;
pub mod flags;
pub mod handle;
pub mod layout;
pub mod patcher;
pub mod session;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience (flattened imports)
pub use descriptor::DescriptorView;
pub use engine::HostEngine;
pub use error::{InstallError, ProbeError, ResolveError, SessionError};
pub use flags::AccessFlags;
pub use handle::{resolve_descriptor_address, MethodHandle};
pub use layout::{FlagsMatch, LayoutConfig, ProbeMethod};
pub use patcher::{EntryPointPolicy, HookRecord, InstallTarget, PatchRequest};
pub use session::{HookPlan, InitOutcome, Session, SessionState};
