//! Thin JNI layer over `jni-sys`.
//!
//! `JNIEnv` and `JavaVM` are pointers to function tables; every call goes
//! through the table with the env/vm pointer as first argument. The macros
//! below yield `None` when a table slot is empty instead of panicking.

mod engine;
mod vm;

#[cfg(test)]
pub(crate) mod test_utils;

pub use engine::{JniEngine, LocalRef};
pub use vm::JavaVm;

/// Call a `JNINativeInterface_` function: `jni_call!(env, FindClass, name.as_ptr())`.
///
/// Must be used inside `unsafe`. Evaluates to `Option<R>`.
macro_rules! jni_call {
    ($env:expr, $func:ident $(, $args:expr)* $(,)?) => {{
        let env: *mut jni_sys::JNIEnv = $env;
        match (**env).$func {
            Some(f) => Some(f(env $(, $args)*)),
            None => None,
        }
    }};
}

/// Call a `JNIInvokeInterface_` function through a `JavaVM*`.
macro_rules! jvm_call {
    ($vm:expr, $func:ident $(, $args:expr)* $(,)?) => {{
        let vm: *mut jni_sys::JavaVM = $vm;
        match (**vm).$func {
            Some(f) => Some(f(vm $(, $args)*)),
            None => None,
        }
    }};
}

pub(crate) use jni_call;
pub(crate) use jvm_call;
