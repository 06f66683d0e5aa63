//! Host engine services consumed by the resolver, prober and installer.
//!
//! The real implementation drives JNI from inside the app process. Everything
//! here is expressed in terms of opaque references so the core can be exercised
//! against an in-memory engine.

use core::ffi::c_void;
use std::ffi::CStr;

use crate::handle::MethodHandle;

pub trait HostEngine {
    /// Local reference to a class or object.
    type Ref: Copy;
    /// Field handle returned by metadata or reflective lookup.
    type Field: Copy;

    /// Runtime API level, 0 when unknown.
    fn api_level(&self) -> u32;

    fn find_class(&self, name: &CStr) -> Option<Self::Ref>;

    /// Bind `implementation` as the native body of `class.name(signature)`.
    fn register_native(
        &self,
        class: Self::Ref,
        name: &CStr,
        signature: &CStr,
        implementation: *const c_void,
    ) -> bool;

    fn static_method(
        &self,
        class: Self::Ref,
        name: &CStr,
        signature: &CStr,
    ) -> Option<MethodHandle>;

    /// Materialize `handle` as a `java.lang.reflect.Method`.
    fn to_reflected_method(
        &self,
        class: Self::Ref,
        handle: MethodHandle,
        is_static: bool,
    ) -> Option<Self::Ref>;

    /// Ordinary metadata lookup of an instance field on the reflected method type.
    fn method_field(&self, name: &CStr, signature: &CStr) -> Option<Self::Field>;

    /// `owner.getDeclaredField(name)`, `setAccessible(true)`, then back to a field handle.
    fn reflected_field(&self, owner: &CStr, name: &CStr) -> Option<Self::Field>;

    fn read_long_field(&self, object: Self::Ref, field: Self::Field) -> i64;

    fn delete_local_ref(&self, reference: Self::Ref);

    /// Check for a pending error, describe and clear it. Returns whether one was pending.
    fn take_pending_error(&self) -> bool;
}
