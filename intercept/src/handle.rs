//! Method handle to descriptor address resolution.
//!
//! Before API level 30 a `jmethodID` is the `ArtMethod*` itself. From 30 on,
//! the runtime may hand out index-encoded ids (odd bit pattern) that only the
//! reflection bridge can turn back into a descriptor.

use log::{debug, info, warn};

use crate::engine::HostEngine;
use crate::error::ResolveError;

/// First API level that may hand out index-encoded method ids.
pub const INDEX_ID_MIN_API_LEVEL: u32 = 30;

/// Private `long` field on the reflected method holding the descriptor address.
pub const DESCRIPTOR_FIELD: &str = "artMethod";
const DESCRIPTOR_FIELD_C: &std::ffi::CStr = c"artMethod";
const DESCRIPTOR_FIELD_SIG: &std::ffi::CStr = c"J";

/// Classes searched for the descriptor field through the reflection bridge.
/// `getDeclaredField` does not look at superclasses, and the field is
/// declared on `Executable`.
const REFLECTIVE_OWNERS: [&std::ffi::CStr; 2] =
    [c"java/lang/reflect/Method", c"java/lang/reflect/Executable"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandle(usize);

impl MethodHandle {
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Odd bit patterns are table indices, not pointers.
    pub const fn is_index_encoded(self) -> bool {
        self.0 % 2 != 0
    }
}

impl std::fmt::Display for MethodHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "jmethodID({:#x})", self.0)
    }
}

/// Resolve `handle` (declared on `class`) to the address of its `ArtMethod`.
pub fn resolve_descriptor_address<E: HostEngine>(
    engine: &E,
    handle: MethodHandle,
    class: E::Ref,
    is_static: bool,
) -> Result<usize, ResolveError> {
    if engine.api_level() < INDEX_ID_MIN_API_LEVEL || !handle.is_index_encoded() {
        if handle.is_null() {
            return Err(ResolveError::NullDescriptor(handle));
        }
        return Ok(handle.bits());
    }

    debug!("{} is index-encoded, resolving through reflection", handle);

    let reflected = engine.to_reflected_method(class, handle, is_static);
    if engine.take_pending_error() {
        if let Some(obj) = reflected {
            engine.delete_local_ref(obj);
        }
        return Err(ResolveError::PendingError { step: "ToReflectedMethod" });
    }
    let reflected = reflected.ok_or(ResolveError::ReflectionFailed(handle))?;

    let result = read_descriptor_field(engine, reflected);
    engine.delete_local_ref(reflected);

    let address = result? as usize;
    if address == 0 {
        return Err(ResolveError::NullDescriptor(handle));
    }
    info!("Converted index {} to ArtMethod {:#x}", handle, address);
    Ok(address)
}

fn read_descriptor_field<E: HostEngine>(
    engine: &E,
    reflected: E::Ref,
) -> Result<i64, ResolveError> {
    let field = match engine.method_field(DESCRIPTOR_FIELD_C, DESCRIPTOR_FIELD_SIG) {
        Some(field) if !engine.take_pending_error() => field,
        _ => {
            // A failed GetFieldID leaves NoSuchFieldError pending.
            engine.take_pending_error();
            debug!("'{}' hidden from metadata lookup, trying reflection", DESCRIPTOR_FIELD);
            find_field_reflectively(engine)?
        }
    };

    let value = engine.read_long_field(reflected, field);
    if engine.take_pending_error() {
        return Err(ResolveError::PendingError { step: "GetLongField" });
    }
    Ok(value)
}

fn find_field_reflectively<E: HostEngine>(engine: &E) -> Result<E::Field, ResolveError> {
    for owner in REFLECTIVE_OWNERS {
        let field = engine.reflected_field(owner, DESCRIPTOR_FIELD_C);
        if engine.take_pending_error() {
            debug!("getDeclaredField failed on {:?}", owner);
            continue;
        }
        if let Some(field) = field {
            return Ok(field);
        }
    }
    warn!("Failed to get {} field through reflection", DESCRIPTOR_FIELD);
    Err(ResolveError::FieldNotFound(DESCRIPTOR_FIELD))
}
