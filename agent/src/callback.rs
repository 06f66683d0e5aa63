//! Managed callback that decides the hooked method's final result.

use std::ffi::CString;

use anyhow::{anyhow, Context, Result};
use artpatch_intercept::HostEngine;
use jni_sys::{jclass, jint, jmethodID};
use log::{debug, info, warn};

use crate::config::CallbackSpec;
use crate::interceptor::{CallbackOutcome, ManagedCallback};
use crate::jni::{JavaVm, JniEngine};

/// Global class reference plus static method id. Both stay valid for the
/// life of the process: the class is pinned, so it is never unloaded.
#[derive(Debug, Clone, Copy)]
pub struct CallbackBinding {
    class: jclass,
    method: jmethodID,
}

// Global references and method ids are not tied to the creating thread.
unsafe impl Send for CallbackBinding {}
unsafe impl Sync for CallbackBinding {}

impl CallbackBinding {
    pub fn resolve(engine: &JniEngine, spec: &CallbackSpec) -> Result<Self> {
        info!("Setting up managed callback {}.{}{}", spec.class, spec.name, spec.signature);

        let class_name = CString::new(spec.class.as_str())?;
        let class = engine.find_class_local(&class_name).ok_or_else(|| {
            engine.take_pending_error();
            anyhow!("class {} not found", spec.class)
        })?;
        let global = engine
            .new_global_ref(class.as_raw())
            .context("failed to create global reference for callback class")?;

        let name = CString::new(spec.name.as_str())?;
        let signature = CString::new(spec.signature.as_str())?;
        let method = engine.static_method_id(global, &name, &signature).ok_or_else(|| {
            engine.take_pending_error();
            anyhow!("static method {}{} not found on {}", spec.name, spec.signature, spec.class)
        })?;

        debug!("Callback bound: class {:p}, method {:p}", global, method);
        Ok(Self { class: global, method })
    }
}

/// Callback invoked through whatever `JNIEnv` the current thread has,
/// attaching the thread first if needed.
pub struct JniCallback {
    vm: JavaVm,
    binding: CallbackBinding,
}

impl JniCallback {
    pub fn new(vm: JavaVm, binding: CallbackBinding) -> Self {
        Self { vm, binding }
    }
}

impl ManagedCallback for JniCallback {
    fn call(&self, original: i32) -> CallbackOutcome {
        let Some(env) = self.vm.env_for_current_thread() else {
            return CallbackOutcome::NoContext;
        };
        // SAFETY: `env` belongs to this thread for the duration of the call.
        let engine = unsafe { JniEngine::bare(env) };
        let binding = self.binding;
        let result = engine.call_static_int(binding.class, binding.method, original as jint);
        if engine.take_pending_error() {
            warn!("Managed callback raised; exception cleared");
            return CallbackOutcome::Raised;
        }
        CallbackOutcome::Returned(result)
    }
}
