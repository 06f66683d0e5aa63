use bitflags::bitflags;

bitflags! {
    /// ART access flags as stored in `ArtMethod::access_flags_`.
    ///
    /// The low 16 bits are the Java modifiers from the dex file; the upper
    /// bits are runtime-private.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0000_0001;
        const STATIC = 0x0000_0008;
        const NATIVE = 0x0000_0100;
        /// `@FastNative`: skips the thread state transition.
        const FAST_NATIVE = 0x0008_0000;
        /// Bit some builds used for `@CriticalNative` before it moved.
        const CRITICAL_NATIVE_LEGACY = 0x0010_0000;
        /// `@CriticalNative`: no `JNIEnv*`/`jclass`, no transition, no GC bookkeeping.
        const CRITICAL_NATIVE = 0x0020_0000;

        const _ = !0;
    }
}

impl AccessFlags {
    /// Mask over the dex-level modifiers.
    pub const JAVA_MASK: u32 = 0xFFFF;

    /// Minimum modifiers a registered static native must carry.
    pub const REQUIRED_FOR_PROBE: Self = Self::STATIC.union(Self::NATIVE);

    /// Exact modifiers of a `public static native` probe method.
    pub const EXPECTED_PROBE: Self = Self::PUBLIC.union(Self::STATIC).union(Self::NATIVE);

    /// Every marker that makes the runtime bypass the generic JNI path.
    pub const FAST_PATH: Self = Self::FAST_NATIVE
        .union(Self::CRITICAL_NATIVE)
        .union(Self::CRITICAL_NATIVE_LEGACY);

    pub fn java_modifiers(self) -> Self {
        Self::from_bits_retain(self.bits() & Self::JAVA_MASK)
    }

    pub fn has_fast_path(self) -> bool {
        self.intersects(Self::FAST_PATH)
    }

    /// Flags as the installer writes them back: fast-path markers stripped,
    /// native forced on, everything else untouched.
    pub fn as_generic_native(self) -> Self {
        (self - Self::FAST_PATH) | Self::NATIVE
    }
}
