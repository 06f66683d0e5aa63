//! Interceptor slots.
//!
//! Each slot is a distinct `extern "system"` function that the patched
//! `ArtMethod::data_` points at. The generic JNI trampoline always hands it
//! `(JNIEnv*, jclass)`, whatever convention the original had. A slot calls the
//! saved original, passes its result to the managed callback and returns
//! whatever the callback decided.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;

use jni_sys::{jclass, jint, JNIEnv};
use log::{debug, error, warn};

use crate::config::CallConvention;

pub const MAX_SLOTS: usize = 4;

type InterceptorFn = extern "system" fn(*mut JNIEnv, jclass) -> jint;
type CriticalOriginal = extern "system" fn() -> jint;
type JniOriginal = extern "system" fn(*mut JNIEnv, jclass) -> jint;

/// What the managed callback did with the original result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Returned(i32),
    /// An exception was raised and cleared.
    Raised,
    /// No `JNIEnv` could be obtained for this thread.
    NoContext,
}

pub trait ManagedCallback: Send + Sync {
    fn call(&self, original: i32) -> CallbackOutcome;
}

static CALLBACK: OnceLock<Box<dyn ManagedCallback>> = OnceLock::new();

/// Set the process-wide callback. Only the first call wins.
pub fn install_callback(callback: impl ManagedCallback + 'static) -> bool {
    CALLBACK.set(Box::new(callback)).is_ok()
}

pub fn callback_installed() -> bool {
    CALLBACK.get().is_some()
}

pub struct InterceptSlot {
    original: AtomicUsize,
    convention: AtomicU8,
    claimed: AtomicBool,
}

impl InterceptSlot {
    const fn new() -> Self {
        Self {
            original: AtomicUsize::new(0),
            convention: AtomicU8::new(0),
            claimed: AtomicBool::new(false),
        }
    }

    /// Cell the installer stores the original `data_` into.
    pub fn original_cell(&self) -> &AtomicUsize {
        &self.original
    }

    fn convention(&self) -> CallConvention {
        match self.convention.load(Ordering::Acquire) {
            0 => CallConvention::Normal,
            1 => CallConvention::Fast,
            _ => CallConvention::Critical,
        }
    }

    fn set_convention(&self, convention: CallConvention) {
        let raw = match convention {
            CallConvention::Normal => 0,
            CallConvention::Fast => 1,
            CallConvention::Critical => 2,
        };
        self.convention.store(raw, Ordering::Release);
    }

    /// Run the saved original, if any.
    ///
    /// # Safety
    /// The stored address must be a function of the recorded convention
    /// returning `jint`.
    unsafe fn call_original(&self, env: *mut JNIEnv, class: jclass) -> Option<jint> {
        let original = self.original.load(Ordering::Acquire);
        if original == 0 {
            return None;
        }
        let result = match self.convention() {
            CallConvention::Critical => {
                let f: CriticalOriginal = std::mem::transmute(original);
                f()
            }
            CallConvention::Normal | CallConvention::Fast => {
                let f: JniOriginal = std::mem::transmute(original);
                f(env, class)
            }
        };
        Some(result)
    }
}

static SLOTS: [InterceptSlot; MAX_SLOTS] = [const { InterceptSlot::new() }; MAX_SLOTS];

macro_rules! slot_entries {
    ($($name:ident => $index:expr),* $(,)?) => {
        $(
            extern "system" fn $name(env: *mut JNIEnv, class: jclass) -> jint {
                intercept(&SLOTS[$index], env, class)
            }
        )*
        static ENTRIES: [InterceptorFn; MAX_SLOTS] = [$($name),*];
    };
}

slot_entries! {
    intercept_slot_0 => 0,
    intercept_slot_1 => 1,
    intercept_slot_2 => 2,
    intercept_slot_3 => 3,
}

fn intercept(slot: &InterceptSlot, env: *mut JNIEnv, class: jclass) -> jint {
    dispatch(slot, env, class, CALLBACK.get().map(|cb| cb.as_ref()))
}

/// Original first, then the callback with its result. Every failure degrades
/// to the best value obtained so far.
pub(crate) fn dispatch(
    slot: &InterceptSlot,
    env: *mut JNIEnv,
    class: jclass,
    callback: Option<&dyn ManagedCallback>,
) -> jint {
    // SAFETY: the slot's original and convention were recorded together at claim/install time.
    let original = unsafe { slot.call_original(env, class) };
    if original.is_none() {
        error!("Interceptor reached without a saved original");
    }
    let fallback = original.unwrap_or(0);

    let Some(callback) = callback else {
        return fallback;
    };
    match callback.call(fallback) {
        CallbackOutcome::Returned(result) => {
            debug!("Interceptor: original {:?} -> {}", original, result);
            result
        }
        CallbackOutcome::Raised => fallback,
        CallbackOutcome::NoContext => {
            warn!("No JNIEnv for thread {}, returning original result", crate::thread_id());
            fallback
        }
    }
}

/// A slot bound to one target for the rest of the process.
#[derive(Clone, Copy)]
pub struct SlotClaim {
    pub index: usize,
    pub slot: &'static InterceptSlot,
    pub entry: usize,
}

/// Take the next free slot and record the original's calling convention.
pub fn claim_slot(convention: CallConvention) -> Option<SlotClaim> {
    SLOTS.iter().enumerate().find_map(|(index, slot)| {
        slot.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        slot.set_convention(convention);
        Some(SlotClaim {
            index,
            slot,
            entry: ENTRIES[index] as usize,
        })
    })
}

#[cfg(test)]
fn release_all_slots() {
    for slot in &SLOTS {
        slot.original.store(0, Ordering::Release);
        slot.claimed.store(false, Ordering::Release);
    }
}
