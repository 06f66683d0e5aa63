//! In-process fake `JNIEnv`/`JavaVM` function tables.
//!
//! Only the slots the agent touches are filled; everything else stays `None`.
//! State is thread-local so tests can run in parallel.

use core::ffi::{c_char, c_void};
use std::cell::RefCell;
use std::ffi::CStr;

use jni_sys::{
    jboolean, jclass, jfieldID, jint, jmethodID, jobject, jvalue, JNIEnv, JNIInvokeInterface_,
    JNINativeInterface_, JavaVM, JNI_EDETACHED, JNI_ERR, JNI_FALSE, JNI_OK, JNI_TRUE,
};

pub(crate) const BUILD_VERSION: usize = 0x100;
pub(crate) const SDK_INT_FIELD: usize = 0x200;

#[derive(Default)]
pub(crate) struct FakeState {
    pub(crate) pending: bool,
    pub(crate) attached: bool,
    pub(crate) attach_fails: bool,
    pub(crate) attach_calls: u32,
    pub(crate) sdk_int: Option<jint>,
    pub(crate) callback_raises: bool,
    pub(crate) callback_args: Vec<jint>,
    pub(crate) deleted_refs: u32,
    env: usize,
    vm: usize,
}

thread_local! {
    static STATE: RefCell<FakeState> = RefCell::new(FakeState::default());
}

pub(crate) fn with_state<R>(f: impl FnOnce(&mut FakeState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Owns the tables; the raw pointers handed out stay valid while it lives.
pub(crate) struct FakeJvm {
    _functions: Box<JNINativeInterface_>,
    env: Box<JNIEnv>,
    _invoke: Box<JNIInvokeInterface_>,
    vm: Box<JavaVM>,
}

impl FakeJvm {
    pub(crate) fn new() -> Self {
        let mut functions: Box<JNINativeInterface_> = Box::new(unsafe { std::mem::zeroed() });
        functions.FindClass = Some(find_class);
        functions.ExceptionCheck = Some(exception_check);
        functions.ExceptionClear = Some(exception_clear);
        functions.DeleteLocalRef = Some(delete_local_ref);
        functions.GetStaticFieldID = Some(get_static_field_id);
        functions.GetStaticIntField = Some(get_static_int_field);
        functions.CallStaticIntMethodA = Some(call_static_int_method_a);
        functions.GetJavaVM = Some(get_java_vm);

        let mut invoke: Box<JNIInvokeInterface_> = Box::new(unsafe { std::mem::zeroed() });
        invoke.GetEnv = Some(get_env);
        invoke.AttachCurrentThread = Some(attach_current_thread);

        let env = Box::new(&*functions as *const JNINativeInterface_);
        let vm = Box::new(&*invoke as *const JNIInvokeInterface_);
        let fake = Self {
            _functions: functions,
            env,
            _invoke: invoke,
            vm,
        };
        with_state(|s| {
            *s = FakeState {
                attached: true,
                env: fake.env() as usize,
                vm: fake.vm() as usize,
                ..FakeState::default()
            }
        });
        fake
    }

    pub(crate) fn env(&self) -> *mut JNIEnv {
        &*self.env as *const JNIEnv as *mut JNIEnv
    }

    pub(crate) fn vm(&self) -> *mut JavaVM {
        &*self.vm as *const JavaVM as *mut JavaVM
    }
}

unsafe extern "system" fn find_class(_env: *mut JNIEnv, name: *const c_char) -> jclass {
    let name = CStr::from_ptr(name);
    with_state(|s| {
        if name.to_bytes() == b"android/os/Build$VERSION" && s.sdk_int.is_some() {
            BUILD_VERSION as jclass
        } else {
            s.pending = true;
            std::ptr::null_mut()
        }
    })
}

unsafe extern "system" fn exception_check(_env: *mut JNIEnv) -> jboolean {
    if with_state(|s| s.pending) {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

unsafe extern "system" fn exception_clear(_env: *mut JNIEnv) {
    with_state(|s| s.pending = false);
}

unsafe extern "system" fn delete_local_ref(_env: *mut JNIEnv, _obj: jobject) {
    with_state(|s| s.deleted_refs += 1);
}

unsafe extern "system" fn get_static_field_id(
    _env: *mut JNIEnv,
    _class: jclass,
    name: *const c_char,
    _sig: *const c_char,
) -> jfieldID {
    if CStr::from_ptr(name).to_bytes() == b"SDK_INT" {
        SDK_INT_FIELD as jfieldID
    } else {
        with_state(|s| s.pending = true);
        std::ptr::null_mut()
    }
}

unsafe extern "system" fn get_static_int_field(
    _env: *mut JNIEnv,
    _class: jclass,
    _field: jfieldID,
) -> jint {
    with_state(|s| s.sdk_int.unwrap_or(0))
}

unsafe extern "system" fn call_static_int_method_a(
    _env: *mut JNIEnv,
    _class: jclass,
    _method: jmethodID,
    args: *const jvalue,
) -> jint {
    let arg = (*args).i;
    with_state(|s| {
        s.callback_args.push(arg);
        if s.callback_raises {
            s.pending = true;
            0
        } else {
            arg + 58
        }
    })
}

unsafe extern "system" fn get_java_vm(_env: *mut JNIEnv, vm: *mut *mut JavaVM) -> jint {
    *vm = with_state(|s| s.vm) as *mut JavaVM;
    JNI_OK
}

unsafe extern "system" fn get_env(
    _vm: *mut JavaVM,
    penv: *mut *mut c_void,
    _version: jint,
) -> jint {
    with_state(|s| {
        if s.attached {
            *penv = s.env as *mut c_void;
            JNI_OK
        } else {
            JNI_EDETACHED
        }
    })
}

unsafe extern "system" fn attach_current_thread(
    _vm: *mut JavaVM,
    penv: *mut *mut c_void,
    _args: *mut c_void,
) -> jint {
    with_state(|s| {
        s.attach_calls += 1;
        if s.attach_fails {
            return JNI_ERR;
        }
        s.attached = true;
        *penv = s.env as *mut c_void;
        JNI_OK
    })
}
