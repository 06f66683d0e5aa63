//! ArtPatch agent - loaded into an Android app process via `System.loadLibrary`.
//!
//! Exposes the app's JNI entry points, binds the core's `HostEngine` to a
//! live `JNIEnv` and owns the process-global hook session.

pub mod callback;
pub mod config;
pub mod interceptor;
pub mod jni;
pub mod logging;

use std::ffi::CString;
use std::sync::{Mutex, OnceLock};

use anyhow::{anyhow, bail, Result};
use artpatch_intercept::{
    HookPlan, HostEngine, InitOutcome, InstallTarget, MethodHandle, PatchRequest, ProbeMethod,
    Session,
};
use jni_sys::{jboolean, jclass, jobject, JNIEnv, JNI_FALSE, JNI_TRUE};
use log::{debug, error, info, warn};

use crate::callback::{CallbackBinding, JniCallback};
use crate::config::{AgentConfig, CallConvention, TargetSpec};
use crate::interceptor::{claim_slot, SlotClaim};
use crate::jni::{JavaVm, JniEngine, LocalRef};

/// Global agent state.
static AGENT: OnceLock<Agent> = OnceLock::new();

pub(crate) fn thread_id() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

/// Body of the probe method. Registered only so its `ArtMethod` shows a known
/// `data_`; never meant to do anything when called.
extern "system" fn native_mark(_env: *mut JNIEnv, _class: jclass) {
    debug!("nativeMark called");
}

/// A configured target that resolved to a class, a method and a free slot.
struct PreparedTarget<'e> {
    label: String,
    class: LocalRef<'e>,
    handle: MethodHandle,
    claim: SlotClaim,
    spec: &'e TargetSpec,
}

pub struct Agent {
    vm: JavaVm,
    config: AgentConfig,
    session: Mutex<Session>,
}

impl Agent {
    fn obtain(env: *mut JNIEnv) -> Result<&'static Agent> {
        if let Some(agent) = AGENT.get() {
            return Ok(agent);
        }
        let vm = unsafe { JavaVm::from_env(env) }.ok_or_else(|| anyhow!("failed to get JavaVM"))?;
        let agent = Agent {
            vm,
            config: config::load(),
            session: Mutex::new(Session::new()),
        };
        debug!("Agent config: {:?}", agent.config);
        let _ = AGENT.set(agent);
        AGENT.get().ok_or_else(|| anyhow!("agent state unavailable"))
    }

    pub fn is_hooked(&self) -> bool {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).is_hooked()
    }

    /// Probe, bind the callback, install every configured target.
    fn init_hook(&self, env: *mut JNIEnv) -> Result<()> {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if session.is_hooked() {
            warn!("Hook already active");
            return Ok(());
        }

        let engine = unsafe { JniEngine::new(env) };
        info!("Android API level: {}", engine.api_level());

        let owner_name = CString::new(self.config.owner_class.as_str())?;
        let Some(owner) = engine.find_class_local(&owner_name) else {
            engine.take_pending_error();
            bail!("owner class {} not found", self.config.owner_class);
        };

        let probe_name = CString::new(self.config.probe_method.name.as_str())?;
        let probe_signature = CString::new(self.config.probe_method.signature.as_str())?;

        let prepared = self.prepare_targets(&engine);
        let targets: Vec<InstallTarget<'_, jobject>> = prepared
            .iter()
            .map(|t| InstallTarget {
                label: &t.label,
                class: t.class.as_raw(),
                handle: t.handle,
                is_static: t.spec.is_static,
                request: PatchRequest {
                    interceptor: t.claim.entry,
                    entry_policy: t.spec.entry_policy(),
                    is_critical: t.spec.convention == CallConvention::Critical,
                    original_slot: Some(t.claim.slot.original_cell()),
                },
            })
            .collect();

        let plan = HookPlan {
            owner: owner.as_raw(),
            probe_method: ProbeMethod {
                name: &probe_name,
                signature: &probe_signature,
                implementation: native_mark as usize,
            },
            scan_window: self.config.scan_window,
            targets,
        };

        match session.initialize(&engine, &plan, |engine| self.bind_callback(engine))? {
            InitOutcome::AlreadyHooked => {}
            InitOutcome::Hooked { installed, failed } => {
                info!("Hook active: {} installed, {} failed", installed, failed);
                self.log_summary(&session, &prepared);
            }
        }
        Ok(())
    }

    fn prepare_targets<'e>(&'e self, engine: &'e JniEngine) -> Vec<PreparedTarget<'e>> {
        info!("Hooking {} framework method(s)", self.config.targets.len());
        let mut prepared = Vec::with_capacity(self.config.targets.len());
        for spec in &self.config.targets {
            let label = spec.label();
            match self.prepare_target(engine, spec, &label) {
                Ok((class, handle, claim)) => {
                    debug!("{} bound to interceptor slot {}", label, claim.index);
                    prepared.push(PreparedTarget {
                        label,
                        class,
                        handle,
                        claim,
                        spec,
                    });
                }
                Err(e) => error!("Failed to hook {}: {}", label, e),
            }
        }
        prepared
    }

    fn prepare_target<'e>(
        &self,
        engine: &'e JniEngine,
        spec: &TargetSpec,
        label: &str,
    ) -> Result<(LocalRef<'e>, MethodHandle, SlotClaim)> {
        let class_name = CString::new(spec.class.as_str())?;
        let Some(class) = engine.find_class_local(&class_name) else {
            engine.take_pending_error();
            bail!("class {} not found", spec.class);
        };

        let name = CString::new(spec.method.as_str())?;
        let signature = CString::new(spec.signature.as_str())?;
        let Some(handle) = engine.static_method(class.as_raw(), &name, &signature) else {
            engine.take_pending_error();
            bail!("method {}{} not found", spec.method, spec.signature);
        };

        let claim = claim_slot(spec.convention)
            .ok_or_else(|| anyhow!("no free interceptor slot for {}", label))?;
        Ok((class, handle, claim))
    }

    fn bind_callback(&self, engine: &JniEngine) {
        let Some(spec) = &self.config.callback else {
            info!("No managed callback configured; interceptors pass through");
            return;
        };
        if interceptor::callback_installed() {
            debug!("Managed callback already bound");
            return;
        }
        match CallbackBinding::resolve(engine, spec) {
            Ok(binding) => {
                interceptor::install_callback(JniCallback::new(self.vm, binding));
                info!("Managed callback set up successfully");
            }
            Err(e) => error!(
                "Failed to set up managed callback, interceptors will pass through: {:#}",
                e
            ),
        }
    }

    fn log_summary(&self, session: &Session, prepared: &[PreparedTarget<'_>]) {
        info!("Hooked methods:");
        for record in session.hooks() {
            let label = prepared
                .iter()
                .find(|t| t.handle == record.handle)
                .map_or("<unknown>", |t| t.label.as_str());
            info!(
                "  {} at {:#x}: data_ {:#x} -> {:#x}, flags {:#x} -> {:#x}",
                label,
                record.descriptor,
                record.saved_call_target,
                record.interceptor,
                record.flags_before.bits(),
                record.flags_after.bits()
            );
        }
        match (&self.config.callback, interceptor::callback_installed()) {
            (Some(spec), true) => {
                info!("Managed callback: {}.{}{}", spec.class, spec.name, spec.signature)
            }
            (Some(spec), false) => {
                warn!("Managed callback {}.{} unavailable", spec.class, spec.name)
            }
            (None, _) => info!("Managed callback: none"),
        }
    }
}

/// Run the one-shot hook initialization. Returns whether hooks are active.
///
/// # Safety
/// `env` must be the calling thread's valid `JNIEnv*`.
pub unsafe fn init_hook(env: *mut JNIEnv) -> bool {
    logging::init();
    info!("Initializing ArtPatch hook");

    let agent = match Agent::obtain(env) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to initialize agent: {:#}", e);
            return false;
        }
    };
    if let Err(e) = agent.init_hook(env) {
        error!("Failed to initialize hook: {:#}", e);
    }
    agent.is_hooked()
}

pub fn is_hook_active() -> bool {
    AGENT.get().is_some_and(Agent::is_hooked)
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_test_gccrash_MainActivity_initHook(
    env: *mut JNIEnv,
    _this: jobject,
) {
    if env.is_null() {
        return;
    }
    unsafe {
        init_hook(env);
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_test_gccrash_MainActivity_isHookActive(
    _env: *mut JNIEnv,
    _this: jobject,
) -> jboolean {
    if is_hook_active() {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// Process-global lock for tests that touch the interceptor slots.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
