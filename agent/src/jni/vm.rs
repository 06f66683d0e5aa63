use core::ffi::c_void;
use core::ptr;

use jni_sys::{JNIEnv, JavaVM, JNI_EDETACHED, JNI_OK, JNI_VERSION_1_6};
use log::{debug, warn};

use super::{jni_call, jvm_call};

/// Process-wide `JavaVM*`.
#[derive(Debug, Clone, Copy)]
pub struct JavaVm(*mut JavaVM);

// The JavaVM interface is documented as usable from any thread.
unsafe impl Send for JavaVm {}
unsafe impl Sync for JavaVm {}

impl JavaVm {
    /// # Safety
    /// `env` must be a valid `JNIEnv*` for the calling thread.
    pub unsafe fn from_env(env: *mut JNIEnv) -> Option<Self> {
        let mut vm: *mut JavaVM = ptr::null_mut();
        let status = jni_call!(env, GetJavaVM, &mut vm)?;
        if status != JNI_OK || vm.is_null() {
            return None;
        }
        Some(Self(vm))
    }

    /// `JNIEnv*` for the current thread, attaching it if the runtime does not know it yet.
    ///
    /// Attaching an already attached thread is a no-op on the runtime side.
    pub fn env_for_current_thread(&self) -> Option<*mut JNIEnv> {
        let mut env: *mut JNIEnv = ptr::null_mut();
        unsafe {
            let status = jvm_call!(
                self.0,
                GetEnv,
                &mut env as *mut *mut JNIEnv as *mut *mut c_void,
                JNI_VERSION_1_6
            )?;
            if status == JNI_OK && !env.is_null() {
                return Some(env);
            }
            if status != JNI_EDETACHED {
                warn!("GetEnv failed with status {}", status);
            }

            debug!("Attaching thread {} to the runtime", crate::thread_id());
            let status = jvm_call!(
                self.0,
                AttachCurrentThread,
                &mut env as *mut *mut JNIEnv as *mut *mut c_void,
                ptr::null_mut()
            )?;
            if status != JNI_OK || env.is_null() {
                warn!("AttachCurrentThread failed with status {}", status);
                return None;
            }
        }
        Some(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jni::test_utils::{with_state, FakeJvm};

    #[test]
    fn test_attached_thread_reuses_env() {
        let fake = FakeJvm::new();
        let vm = unsafe { JavaVm::from_env(fake.env()) }.unwrap();
        assert_eq!(vm.env_for_current_thread(), Some(fake.env()));
        assert_eq!(with_state(|s| s.attach_calls), 0);
    }

    #[test]
    fn test_detached_thread_gets_attached_once() {
        let fake = FakeJvm::new();
        with_state(|s| s.attached = false);
        let vm = unsafe { JavaVm::from_env(fake.env()) }.unwrap();

        assert_eq!(vm.env_for_current_thread(), Some(fake.env()));
        assert_eq!(vm.env_for_current_thread(), Some(fake.env()));
        assert_eq!(with_state(|s| s.attach_calls), 1);
    }

    #[test]
    fn test_failed_attach_yields_no_env() {
        let fake = FakeJvm::new();
        with_state(|s| {
            s.attached = false;
            s.attach_fails = true;
        });
        let vm = unsafe { JavaVm::from_env(fake.env()) }.unwrap();
        assert_eq!(vm.env_for_current_thread(), None);
    }
}
