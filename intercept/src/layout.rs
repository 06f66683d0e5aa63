//! Runtime discovery of the `ArtMethod` field layout.
//!
//! No public interface exposes these offsets and they move between Android
//! releases and vendor builds. Instead we register a throwaway native method
//! whose implementation address we know, then look for that address inside
//! its freshly created descriptor. The flags field is found the same way by
//! the modifiers the probe method was declared with.
//!
//! A dynamically registered method is never compiled, so the word right after
//! `data_` (the quick-code entry point) is the generic JNI trampoline.

use std::ffi::CStr;

use log::{debug, info, warn};

use crate::descriptor::{DescriptorView, WORD_SIZE};
use crate::engine::HostEngine;
use crate::error::ProbeError;
use crate::flags::AccessFlags;
use crate::handle::resolve_descriptor_address;

pub const DEFAULT_SCAN_WINDOW: usize = 128;

/// Flags offset assumed when nothing in the descriptor looks like the probe's modifiers.
pub const FALLBACK_FLAGS_OFFSET: usize = 4;

/// How the access flags offset was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagsMatch {
    /// Low 16 bits equal `public static native`.
    Exact,
    /// First word carrying at least `static native`.
    Tentative,
    /// Nothing matched; fixed offset assumed.
    Fallback,
}

/// Frozen descriptor layout. Only ever built by a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    /// Bytes of the descriptor covered by the fields below.
    pub descriptor_size: usize,
    pub access_flags_offset: usize,
    /// Offset of `data_`, the JNI call target.
    pub call_target_offset: usize,
    /// Offset of `entry_point_from_quick_compiled_code_`.
    pub compiled_entry_offset: usize,
    pub generic_trampoline: usize,
    pub flags_match: FlagsMatch,
}

/// The throwaway method registered on the owner class.
#[derive(Debug, Clone, Copy)]
pub struct ProbeMethod<'a> {
    pub name: &'a CStr,
    pub signature: &'a CStr,
    /// Native body; must not appear anywhere else in the descriptor.
    pub implementation: usize,
}

/// Register `method` on `owner`, resolve its descriptor and read the layout out of it.
pub fn probe<E: HostEngine>(
    engine: &E,
    owner: E::Ref,
    method: &ProbeMethod<'_>,
    window: usize,
) -> Result<LayoutConfig, ProbeError> {
    info!("Probing ArtMethod layout (window {} bytes)", window);

    let label = method.name.to_string_lossy().into_owned();
    let registered = engine.register_native(
        owner,
        method.name,
        method.signature,
        method.implementation as *const core::ffi::c_void,
    );
    if engine.take_pending_error() || !registered {
        return Err(ProbeError::RegistrationFailed(label));
    }

    let handle = engine.static_method(owner, method.name, method.signature);
    if engine.take_pending_error() {
        return Err(ProbeError::ProbeMethodMissing(label));
    }
    let handle = handle.ok_or(ProbeError::ProbeMethodMissing(label))?;

    let address = resolve_descriptor_address(engine, handle, owner, true)?;
    debug!("Probe method descriptor at {:#x}", address);

    // SAFETY: the probe method lives as long as its class, which is pinned by
    // the caller holding `owner`; the window is read-only here.
    let view = unsafe { DescriptorView::from_address(address, window) }
        .ok_or(ProbeError::Resolve(crate::error::ResolveError::NullDescriptor(handle)))?;
    layout_from_view(&view, method.implementation)
}

/// Derive the layout from a probe method's descriptor.
pub fn layout_from_view(
    view: &DescriptorView,
    implementation: usize,
) -> Result<LayoutConfig, ProbeError> {
    let call_target_offset =
        find_call_target_offset(view, implementation).ok_or(ProbeError::CallTargetNotFound {
            target: implementation,
            window: view.len(),
        })?;
    info!("Found data_ offset: {}", call_target_offset);

    let (access_flags_offset, flags_match) = find_access_flags_offset(view, call_target_offset);

    let compiled_entry_offset = call_target_offset + WORD_SIZE;
    let generic_trampoline = view
        .read_word(compiled_entry_offset)
        .ok_or(ProbeError::EntryPointOutOfWindow(compiled_entry_offset))?;
    info!(
        "Derived entry point offset {}, generic JNI trampoline {:#x}",
        compiled_entry_offset, generic_trampoline
    );

    Ok(LayoutConfig {
        descriptor_size: (compiled_entry_offset + WORD_SIZE).max(access_flags_offset + 4),
        access_flags_offset,
        call_target_offset,
        compiled_entry_offset,
        generic_trampoline,
        flags_match,
    })
}

/// First pointer-aligned offset whose word equals `implementation`.
pub fn find_call_target_offset(view: &DescriptorView, implementation: usize) -> Option<usize> {
    view.words()
        .find(|&(_, word)| word == implementation)
        .map(|(offset, _)| offset)
}

/// Locate the 32-bit access flags strictly before `data_`.
pub fn find_access_flags_offset(view: &DescriptorView, before: usize) -> (usize, FlagsMatch) {
    let mut tentative = None;

    for (offset, value) in view.u32s_before(before) {
        let modifiers = AccessFlags::from_bits_retain(value).java_modifiers();
        if !modifiers.contains(AccessFlags::REQUIRED_FOR_PROBE) {
            continue;
        }
        debug!("Potential access_flags candidate at offset {}: {:#x}", offset, value);

        if modifiers == AccessFlags::EXPECTED_PROBE {
            info!("Found exact access_flags offset: {}", offset);
            return (offset, FlagsMatch::Exact);
        }
        if tentative.is_none() {
            debug!("Taking offset {} as tentative access_flags", offset);
            tentative = Some(offset);
        }
    }

    match tentative {
        Some(offset) => {
            warn!("Only a tentative access_flags match at offset {}", offset);
            (offset, FlagsMatch::Tentative)
        }
        None => {
            warn!(
                "Could not find access_flags, defaulting to {} (value there: {:#x?})",
                FALLBACK_FLAGS_OFFSET,
                view.read_u32(FALLBACK_FLAGS_OFFSET)
            );
            (FALLBACK_FLAGS_OFFSET, FlagsMatch::Fallback)
        }
    }
}
