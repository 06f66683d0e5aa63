//! In-memory engine for exercising the resolver, prober and installer.
//!
//! Descriptors mimic a 64-bit `ArtMethod`: declaring class and access flags
//! up front, `data_` at a fixed offset and the quick-code entry right after it.

use core::ffi::c_void;
use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};

use crate::descriptor::{DescriptorView, WORD_SIZE};
use crate::engine::HostEngine;
use crate::flags::AccessFlags;
use crate::handle::MethodHandle;
use crate::layout::ProbeMethod;

pub(crate) const FAKE_WORDS: usize = 16;
pub(crate) const FAKE_FLAGS_OFFSET: usize = 4;
pub(crate) const FAKE_CALL_TARGET_OFFSET: usize = 4 * WORD_SIZE;
pub(crate) const FAKE_TRAMPOLINE: usize = 0x7100_4000;
const FAKE_COMPILED_STUB: usize = 0x7200_8000;

pub(crate) const OWNER_CLASS: usize = 0x10;
pub(crate) const FRAMEWORK_CLASS: usize = 0x20;
const REFLECTED_BASE: usize = 0x1000;
const DIRECT_FIELD: u8 = 1;
const REFLECTIVE_FIELD: u8 = 2;

extern "C" fn fake_probe_impl() {}

pub(crate) fn probe_method() -> ProbeMethod<'static> {
    ProbeMethod {
        name: c"nativeMark",
        signature: c"()V",
        implementation: fake_probe_impl as usize,
    }
}

/// Heap-pinned fake `ArtMethod`.
pub(crate) struct FakeDescriptor {
    words: *mut [usize; FAKE_WORDS],
}

impl FakeDescriptor {
    pub(crate) fn new(flags: AccessFlags, call_target: usize, entry: usize) -> Self {
        let words = Box::into_raw(Box::new([0usize; FAKE_WORDS]));
        let descriptor = Self { words };
        let view = descriptor.view(FAKE_WORDS * WORD_SIZE);
        unsafe {
            view.write_u32(0, 0x12c0_5a78); // declaring_class_
            view.write_u32(FAKE_FLAGS_OFFSET, flags.bits());
            view.write_u32(8, 0x1f3); // dex_method_index_
            view.write_word(FAKE_CALL_TARGET_OFFSET, call_target);
            view.write_word(FAKE_CALL_TARGET_OFFSET + WORD_SIZE, entry);
        }
        descriptor
    }

    pub(crate) fn address(&self) -> usize {
        self.words as usize
    }

    pub(crate) fn view(&self, len: usize) -> DescriptorView {
        let len = len.min(FAKE_WORDS * WORD_SIZE);
        unsafe { DescriptorView::from_address(self.address(), len) }.unwrap()
    }
}

impl Drop for FakeDescriptor {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.words) });
    }
}

struct FakeMethod {
    class: usize,
    name: CString,
    descriptor: FakeDescriptor,
}

pub(crate) struct FakeEngine {
    api_level: u32,
    index_ids: bool,
    hidden_field: bool,
    no_reflective_field: bool,
    broken_reflection: bool,
    failing_registration: bool,
    methods: RefCell<Vec<FakeMethod>>,
    pending: Cell<bool>,
    registrations: Cell<u32>,
    reflection_calls: Cell<u32>,
    reflective_field_lookups: Cell<u32>,
}

impl FakeEngine {
    pub(crate) fn new(api_level: u32) -> Self {
        Self {
            api_level,
            index_ids: false,
            hidden_field: false,
            no_reflective_field: false,
            broken_reflection: false,
            failing_registration: false,
            methods: RefCell::new(Vec::new()),
            pending: Cell::new(false),
            registrations: Cell::new(0),
            reflection_calls: Cell::new(0),
            reflective_field_lookups: Cell::new(0),
        }
    }

    pub(crate) fn with_index_ids(mut self) -> Self {
        self.index_ids = true;
        self
    }

    pub(crate) fn with_hidden_field(mut self) -> Self {
        self.hidden_field = true;
        self
    }

    pub(crate) fn with_no_reflective_field(mut self) -> Self {
        self.no_reflective_field = true;
        self
    }

    pub(crate) fn with_broken_reflection(mut self) -> Self {
        self.broken_reflection = true;
        self
    }

    pub(crate) fn with_failing_registration(mut self) -> Self {
        self.failing_registration = true;
        self
    }

    pub(crate) fn registrations(&self) -> u32 {
        self.registrations.get()
    }

    pub(crate) fn reflection_calls(&self) -> u32 {
        self.reflection_calls.get()
    }

    pub(crate) fn reflective_field_lookups(&self) -> u32 {
        self.reflective_field_lookups.get()
    }

    pub(crate) fn has_pending_error(&self) -> bool {
        self.pending.get()
    }

    fn handle_for(&self, index: usize, address: usize) -> MethodHandle {
        if self.index_ids {
            MethodHandle::from_bits((index << 1) | 1)
        } else {
            MethodHandle::from_bits(address)
        }
    }

    fn insert(
        &self,
        class: usize,
        name: &CStr,
        descriptor: FakeDescriptor,
    ) -> (MethodHandle, usize) {
        let mut methods = self.methods.borrow_mut();
        let address = descriptor.address();
        let index = methods.len();
        methods.push(FakeMethod {
            class,
            name: name.to_owned(),
            descriptor,
        });
        (self.handle_for(index, address), address)
    }

    /// A registered-but-uncompiled `public static native` method on the owner class.
    pub(crate) fn add_probe_like_method(&self) -> (MethodHandle, usize) {
        let descriptor =
            FakeDescriptor::new(AccessFlags::EXPECTED_PROBE, 0x5555_0000, FAKE_TRAMPOLINE);
        self.insert(OWNER_CLASS, c"probeLike", descriptor)
    }

    /// A framework method with a compiled stub and arbitrary flags.
    pub(crate) fn add_framework_method(
        &self,
        name: &CStr,
        flags: AccessFlags,
        implementation: usize,
    ) -> (MethodHandle, usize) {
        let descriptor = FakeDescriptor::new(flags, implementation, FAKE_COMPILED_STUB);
        self.insert(FRAMEWORK_CLASS, name, descriptor)
    }

    pub(crate) fn descriptor_of(&self, name: &CStr) -> Option<usize> {
        self.methods
            .borrow()
            .iter()
            .find(|m| m.name.as_c_str() == name)
            .map(|m| m.descriptor.address())
    }

    pub(crate) fn call_target_at(&self, descriptor: usize) -> usize {
        let view =
            unsafe { DescriptorView::from_address(descriptor, FAKE_WORDS * WORD_SIZE) }.unwrap();
        view.read_word(FAKE_CALL_TARGET_OFFSET).unwrap()
    }

    fn index_of(&self, handle: MethodHandle) -> Option<usize> {
        let methods = self.methods.borrow();
        if handle.is_index_encoded() {
            let index = handle.bits() >> 1;
            (index < methods.len()).then_some(index)
        } else {
            methods.iter().position(|m| m.descriptor.address() == handle.bits())
        }
    }
}

impl HostEngine for FakeEngine {
    type Ref = usize;
    type Field = u8;

    fn api_level(&self) -> u32 {
        self.api_level
    }

    fn find_class(&self, name: &CStr) -> Option<usize> {
        match name.to_bytes() {
            b"com/test/gccrash/MainActivity" => Some(OWNER_CLASS),
            b"android/os/Binder" => Some(FRAMEWORK_CLASS),
            _ => {
                self.pending.set(true);
                None
            }
        }
    }

    fn register_native(
        &self,
        class: usize,
        name: &CStr,
        _signature: &CStr,
        implementation: *const c_void,
    ) -> bool {
        self.registrations.set(self.registrations.get() + 1);
        if self.failing_registration {
            self.pending.set(true);
            return false;
        }
        let existing = self
            .methods
            .borrow()
            .iter()
            .find(|m| m.class == class && m.name.as_c_str() == name)
            .map(|m| m.descriptor.address());
        match existing {
            Some(address) => unsafe {
                DescriptorView::from_address(address, FAKE_WORDS * WORD_SIZE)
                    .unwrap()
                    .write_word(FAKE_CALL_TARGET_OFFSET, implementation as usize);
            },
            None => {
                let descriptor = FakeDescriptor::new(
                    AccessFlags::EXPECTED_PROBE,
                    implementation as usize,
                    FAKE_TRAMPOLINE,
                );
                self.insert(class, name, descriptor);
            }
        }
        true
    }

    fn static_method(&self, class: usize, name: &CStr, _signature: &CStr) -> Option<MethodHandle> {
        let methods = self.methods.borrow();
        let found = methods
            .iter()
            .enumerate()
            .find(|(_, m)| m.class == class && m.name.as_c_str() == name)
            .map(|(index, m)| self.handle_for(index, m.descriptor.address()));
        if found.is_none() {
            self.pending.set(true);
        }
        found
    }

    fn to_reflected_method(
        &self,
        _class: usize,
        handle: MethodHandle,
        _is_static: bool,
    ) -> Option<usize> {
        self.reflection_calls.set(self.reflection_calls.get() + 1);
        if self.broken_reflection {
            self.pending.set(true);
            return None;
        }
        self.index_of(handle).map(|index| REFLECTED_BASE + index)
    }

    fn method_field(&self, _name: &CStr, _signature: &CStr) -> Option<u8> {
        if self.hidden_field {
            self.pending.set(true);
            return None;
        }
        Some(DIRECT_FIELD)
    }

    fn reflected_field(&self, owner: &CStr, _name: &CStr) -> Option<u8> {
        self.reflective_field_lookups.set(self.reflective_field_lookups.get() + 1);
        if self.no_reflective_field || owner.to_bytes() == b"java/lang/reflect/Method" {
            self.pending.set(true);
            return None;
        }
        Some(REFLECTIVE_FIELD)
    }

    fn read_long_field(&self, object: usize, _field: u8) -> i64 {
        let methods = self.methods.borrow();
        match methods.get(object.wrapping_sub(REFLECTED_BASE)) {
            Some(m) => m.descriptor.address() as i64,
            None => {
                self.pending.set(true);
                0
            }
        }
    }

    fn delete_local_ref(&self, _reference: usize) {}

    fn take_pending_error(&self) -> bool {
        self.pending.replace(false)
    }
}
