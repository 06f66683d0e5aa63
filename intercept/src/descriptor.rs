//! Bounds-checked view over a borrowed `ArtMethod`.
//!
//! The runtime owns the memory; we only hold its address. All reads and writes
//! go through byte offsets checked against the view length, and use unaligned
//! access since a probed offset is not guaranteed to be naturally aligned.

use core::ptr::NonNull;

use crate::flags::AccessFlags;
use crate::layout::LayoutConfig;

pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

#[derive(Debug, Clone, Copy)]
pub struct DescriptorView {
    base: NonNull<u8>,
    len: usize,
}

impl DescriptorView {
    /// # Safety
    /// `address` must point to at least `len` readable bytes that stay alive
    /// for as long as the view is used. Writes additionally need the memory
    /// to be writable.
    pub unsafe fn from_address(address: usize, len: usize) -> Option<Self> {
        let base = NonNull::new(address as *mut u8)?;
        Some(Self { base, len })
    }

    pub fn address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn fits(&self, offset: usize, size: usize) -> bool {
        offset.checked_add(size).is_some_and(|end| end <= self.len)
    }

    pub fn read_word(&self, offset: usize) -> Option<usize> {
        if !self.fits(offset, WORD_SIZE) {
            return None;
        }
        Some(unsafe { self.base.as_ptr().add(offset).cast::<usize>().read_unaligned() })
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        if !self.fits(offset, 4) {
            return None;
        }
        Some(unsafe { self.base.as_ptr().add(offset).cast::<u32>().read_unaligned() })
    }

    /// Pointer-aligned `(offset, word)` pairs across the whole view.
    pub fn words(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.len)
            .step_by(WORD_SIZE)
            .filter_map(move |offset| self.read_word(offset).map(|word| (offset, word)))
    }

    /// 4-byte aligned `(offset, value)` pairs strictly before `end`.
    pub fn u32s_before(&self, end: usize) -> impl Iterator<Item = (usize, u32)> + '_ {
        (0..end.min(self.len))
            .step_by(4)
            .filter_map(move |offset| self.read_u32(offset).map(|value| (offset, value)))
    }

    /// # Safety
    /// The underlying memory must be writable and not concurrently accessed.
    pub(crate) unsafe fn write_word(&self, offset: usize, value: usize) -> Option<()> {
        if !self.fits(offset, WORD_SIZE) {
            return None;
        }
        self.base.as_ptr().add(offset).cast::<usize>().write_unaligned(value);
        Some(())
    }

    /// # Safety
    /// Same contract as [`write_word`](Self::write_word).
    pub(crate) unsafe fn write_u32(&self, offset: usize, value: u32) -> Option<()> {
        if !self.fits(offset, 4) {
            return None;
        }
        self.base.as_ptr().add(offset).cast::<u32>().write_unaligned(value);
        Some(())
    }

    // Layout-keyed accessors. Nothing outside this module does offset math.

    pub fn call_target(&self, layout: &LayoutConfig) -> Option<usize> {
        self.read_word(layout.call_target_offset)
    }

    pub fn compiled_entry(&self, layout: &LayoutConfig) -> Option<usize> {
        self.read_word(layout.compiled_entry_offset)
    }

    pub fn access_flags(&self, layout: &LayoutConfig) -> Option<AccessFlags> {
        self.read_u32(layout.access_flags_offset)
            .map(AccessFlags::from_bits_retain)
    }

    /// Whether every field `layout` names lies inside this view.
    pub fn covers(&self, layout: &LayoutConfig) -> Result<(), usize> {
        for (offset, size) in [
            (layout.call_target_offset, WORD_SIZE),
            (layout.compiled_entry_offset, WORD_SIZE),
            (layout.access_flags_offset, 4),
        ] {
            if !self.fits(offset, size) {
                return Err(offset);
            }
        }
        Ok(())
    }

    pub(crate) unsafe fn set_call_target(&self, layout: &LayoutConfig, value: usize) -> Option<()> {
        self.write_word(layout.call_target_offset, value)
    }

    pub(crate) unsafe fn set_compiled_entry(
        &self,
        layout: &LayoutConfig,
        value: usize,
    ) -> Option<()> {
        self.write_word(layout.compiled_entry_offset, value)
    }

    pub(crate) unsafe fn set_access_flags(
        &self,
        layout: &LayoutConfig,
        flags: AccessFlags,
    ) -> Option<()> {
        self.write_u32(layout.access_flags_offset, flags.bits())
    }
}
