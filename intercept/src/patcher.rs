//! The only write path into a live `ArtMethod`.
//!
//! Order matters: `data_` is swapped first so that a caller racing through the
//! old entry point still lands in our interceptor, then the quick-code entry is
//! pointed at the generic JNI trampoline, then the fast-path markers are
//! stripped. None of this is atomic as a group; installation must finish
//! before another thread can reach the method.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};

use crate::descriptor::DescriptorView;
use crate::engine::HostEngine;
use crate::error::InstallError;
use crate::flags::AccessFlags;
use crate::handle::{resolve_descriptor_address, MethodHandle};
use crate::layout::LayoutConfig;

/// What happens to `entry_point_from_quick_compiled_code_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryPointPolicy {
    /// Route every call through the generic JNI trampoline. Required for
    /// methods that were `@FastNative`/`@CriticalNative`, whose compiled stubs
    /// skip argument marshaling and the thread-state transition.
    #[default]
    GenericTrampoline,
    /// Leave the compiled entry alone.
    Keep,
}

#[derive(Debug, Clone, Copy)]
pub struct PatchRequest<'a> {
    pub interceptor: usize,
    pub entry_policy: EntryPointPolicy,
    pub is_critical: bool,
    /// Receives the original `data_` before the interceptor becomes reachable.
    pub original_slot: Option<&'a AtomicUsize>,
}

/// One hooked method. Never mutated after install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRecord {
    pub handle: MethodHandle,
    pub descriptor: usize,
    pub saved_call_target: usize,
    pub interceptor: usize,
    pub entry_before: usize,
    pub entry_after: usize,
    pub flags_before: AccessFlags,
    pub flags_after: AccessFlags,
}

/// A method to hook together with the way to reach it.
#[derive(Debug, Clone, Copy)]
pub struct InstallTarget<'a, R> {
    pub label: &'a str,
    pub class: R,
    pub handle: MethodHandle,
    pub is_static: bool,
    pub request: PatchRequest<'a>,
}

/// Resolve `target` and patch its descriptor with `layout`.
pub fn install<E: HostEngine>(
    engine: &E,
    layout: Option<&LayoutConfig>,
    target: &InstallTarget<'_, E::Ref>,
) -> Result<HookRecord, InstallError> {
    let layout = layout.ok_or(InstallError::LayoutNotProbed)?;
    let address =
        resolve_descriptor_address(engine, target.handle, target.class, target.is_static)?;
    info!("Hooking {} at {:#x}", target.label, address);

    // SAFETY: the target is a method of a loaded class, alive for the rest of
    // the process; `descriptor_size` covers exactly the probed fields.
    let view = unsafe { DescriptorView::from_address(address, layout.descriptor_size) }
        .ok_or(InstallError::Resolve(crate::error::ResolveError::NullDescriptor(target.handle)))?;

    unsafe { patch_descriptor(layout, &view, target.handle, &target.request) }
}

/// Rewrite `view` in place.
///
/// Every field is bounds-checked before the first write, so a failure leaves
/// the descriptor untouched and a success has applied all writes.
///
/// # Safety
/// `view` must cover a live, writable `ArtMethod` that no other thread is
/// dispatching through during the call.
pub unsafe fn patch_descriptor(
    layout: &LayoutConfig,
    view: &DescriptorView,
    handle: MethodHandle,
    request: &PatchRequest<'_>,
) -> Result<HookRecord, InstallError> {
    view.covers(layout).map_err(|offset| InstallError::OffsetOutOfBounds {
        offset,
        size: view.len(),
    })?;

    // `covers` succeeded, so none of the accessors below can miss.
    let saved_call_target = view.call_target(layout).unwrap_or_default();
    let entry_before = view.compiled_entry(layout).unwrap_or_default();
    let flags_before = view.access_flags(layout).unwrap_or(AccessFlags::empty());

    if let Some(slot) = request.original_slot {
        slot.store(saved_call_target, Ordering::Release);
    }

    view.set_call_target(layout, request.interceptor);
    debug!("  Updated data_: {:#x} -> {:#x}", saved_call_target, request.interceptor);

    let entry_after = match request.entry_policy {
        EntryPointPolicy::GenericTrampoline => {
            view.set_compiled_entry(layout, layout.generic_trampoline);
            debug!(
                "  Updated entry point: {:#x} -> {:#x}",
                entry_before, layout.generic_trampoline
            );
            layout.generic_trampoline
        }
        EntryPointPolicy::Keep => entry_before,
    };

    if request.is_critical {
        info!("  Original flags before stripping: {:#x}", flags_before.bits());
        for (bit, name) in [
            (AccessFlags::CRITICAL_NATIVE, "kAccCriticalNative"),
            (AccessFlags::CRITICAL_NATIVE_LEGACY, "legacy critical native"),
            (AccessFlags::FAST_NATIVE, "kAccFastNative"),
        ] {
            if flags_before.contains(bit) {
                info!("    Has {} ({:#x})", name, bit.bits());
            }
        }
    }

    let flags_after = flags_before.as_generic_native();
    view.set_access_flags(layout, flags_after);
    info!("  Updated access_flags: {:#x} -> {:#x}", flags_before.bits(), flags_after.bits());

    Ok(HookRecord {
        handle,
        descriptor: view.address(),
        saved_call_target,
        interceptor: request.interceptor,
        entry_before,
        entry_after,
        flags_before,
        flags_after,
    })
}
