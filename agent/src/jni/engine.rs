//! `HostEngine` over a live `JNIEnv`.

use core::ffi::c_void;
use core::ptr;
use std::ffi::CStr;

use artpatch_intercept::{HostEngine, MethodHandle};
use jni_sys::{
    jclass, jfieldID, jint, jmethodID, jobject, jvalue, JNIEnv, JNINativeMethod, JNI_OK, JNI_TRUE,
};
use log::debug;

use super::jni_call;

const BUILD_VERSION_CLASS: &CStr = c"android/os/Build$VERSION";
const REFLECT_METHOD_CLASS: &CStr = c"java/lang/reflect/Method";
const REFLECT_FIELD_CLASS: &CStr = c"java/lang/reflect/Field";
const CLASS_CLASS: &CStr = c"java/lang/Class";

/// Engine bound to the calling thread's `JNIEnv`. Not `Send`: a `JNIEnv*`
/// is only valid on the thread it was handed to.
pub struct JniEngine {
    env: *mut JNIEnv,
    api_level: u32,
}

/// Local reference deleted on drop.
pub struct LocalRef<'a> {
    engine: &'a JniEngine,
    obj: jobject,
}

impl LocalRef<'_> {
    pub fn as_raw(&self) -> jobject {
        self.obj
    }
}

impl Drop for LocalRef<'_> {
    fn drop(&mut self) {
        self.engine.delete_local_ref(self.obj);
    }
}

impl JniEngine {
    /// # Safety
    /// `env` must be the current thread's valid `JNIEnv*` and outlive the engine.
    pub unsafe fn new(env: *mut JNIEnv) -> Self {
        let mut engine = Self { env, api_level: 0 };
        engine.api_level = engine.read_api_level();
        engine
    }

    /// Engine that skips the API level lookup. For hot paths that only call methods.
    ///
    /// # Safety
    /// Same contract as [`JniEngine::new`].
    pub unsafe fn bare(env: *mut JNIEnv) -> Self {
        Self { env, api_level: 0 }
    }

    fn local(&self, obj: jobject) -> Option<LocalRef<'_>> {
        (!obj.is_null()).then_some(LocalRef { engine: self, obj })
    }

    pub fn find_class_local(&self, name: &CStr) -> Option<LocalRef<'_>> {
        self.find_class(name).and_then(|cls| self.local(cls))
    }

    /// `android.os.Build.VERSION.SDK_INT`, or 0 outside Android.
    fn read_api_level(&self) -> u32 {
        let Some(class) = self.find_class_local(BUILD_VERSION_CLASS) else {
            self.take_pending_error();
            return 0;
        };
        unsafe {
            let field = jni_call!(
                self.env,
                GetStaticFieldID,
                class.as_raw(),
                c"SDK_INT".as_ptr(),
                c"I".as_ptr()
            )
            .unwrap_or(ptr::null_mut());
            if field.is_null() || self.take_pending_error() {
                return 0;
            }
            let level = jni_call!(self.env, GetStaticIntField, class.as_raw(), field).unwrap_or(0);
            if self.take_pending_error() {
                return 0;
            }
            level.max(0) as u32
        }
    }

    pub fn static_method_id(
        &self,
        class: jclass,
        name: &CStr,
        signature: &CStr,
    ) -> Option<jmethodID> {
        let mid = unsafe {
            jni_call!(self.env, GetStaticMethodID, class, name.as_ptr(), signature.as_ptr())
        }?;
        (!mid.is_null()).then_some(mid)
    }

    pub fn new_global_ref(&self, obj: jobject) -> Option<jobject> {
        let global = unsafe { jni_call!(self.env, NewGlobalRef, obj) }?;
        (!global.is_null()).then_some(global)
    }

    fn instance_method_id(
        &self,
        class: jclass,
        name: &CStr,
        signature: &CStr,
    ) -> Option<jmethodID> {
        let mid =
            unsafe { jni_call!(self.env, GetMethodID, class, name.as_ptr(), signature.as_ptr()) }?;
        (!mid.is_null()).then_some(mid)
    }
}

impl HostEngine for JniEngine {
    type Ref = jobject;
    type Field = jfieldID;

    fn api_level(&self) -> u32 {
        self.api_level
    }

    fn find_class(&self, name: &CStr) -> Option<jobject> {
        let cls = unsafe { jni_call!(self.env, FindClass, name.as_ptr()) }?;
        (!cls.is_null()).then_some(cls)
    }

    fn register_native(
        &self,
        class: jobject,
        name: &CStr,
        signature: &CStr,
        implementation: *const c_void,
    ) -> bool {
        let method = JNINativeMethod {
            name: name.as_ptr() as *mut _,
            signature: signature.as_ptr() as *mut _,
            fnPtr: implementation as *mut c_void,
        };
        let status = unsafe { jni_call!(self.env, RegisterNatives, class, &method, 1) };
        status == Some(JNI_OK)
    }

    fn static_method(&self, class: jobject, name: &CStr, signature: &CStr) -> Option<MethodHandle> {
        self.static_method_id(class, name, signature)
            .map(|mid| MethodHandle::from_bits(mid as usize))
    }

    fn to_reflected_method(
        &self,
        class: jobject,
        handle: MethodHandle,
        is_static: bool,
    ) -> Option<jobject> {
        let obj = unsafe {
            jni_call!(
                self.env,
                ToReflectedMethod,
                class,
                handle.bits() as jmethodID,
                is_static as jni_sys::jboolean
            )
        }?;
        (!obj.is_null()).then_some(obj)
    }

    fn method_field(&self, name: &CStr, signature: &CStr) -> Option<jfieldID> {
        let class = self.find_class_local(REFLECT_METHOD_CLASS)?;
        let field = unsafe {
            jni_call!(self.env, GetFieldID, class.as_raw(), name.as_ptr(), signature.as_ptr())
        }?;
        (!field.is_null()).then_some(field)
    }

    fn reflected_field(&self, owner: &CStr, name: &CStr) -> Option<jfieldID> {
        debug!("Trying to get {:?} through reflection on {:?}", name, owner);
        let owner_class = self.find_class_local(owner)?;
        let class_class = self.find_class_local(CLASS_CLASS)?;
        let get_declared_field = self.instance_method_id(
            class_class.as_raw(),
            c"getDeclaredField",
            c"(Ljava/lang/String;)Ljava/lang/reflect/Field;",
        )?;

        unsafe {
            let field_name = self.local(jni_call!(self.env, NewStringUTF, name.as_ptr())?)?;
            let args = [jvalue { l: field_name.as_raw() }];
            let field_obj = jni_call!(
                self.env,
                CallObjectMethodA,
                owner_class.as_raw(),
                get_declared_field,
                args.as_ptr()
            )?;
            let field_obj = self.local(field_obj)?;
            if self.has_pending_error() {
                return None;
            }

            let field_class = self.find_class_local(REFLECT_FIELD_CLASS)?;
            let set_accessible =
                self.instance_method_id(field_class.as_raw(), c"setAccessible", c"(Z)V")?;
            let args = [jvalue { z: JNI_TRUE }];
            let field_obj_raw = field_obj.as_raw();
            jni_call!(self.env, CallVoidMethodA, field_obj_raw, set_accessible, args.as_ptr())?;
            if self.has_pending_error() {
                return None;
            }

            let field = jni_call!(self.env, FromReflectedField, field_obj.as_raw())?;
            (!field.is_null()).then_some(field)
        }
    }

    fn read_long_field(&self, object: jobject, field: jfieldID) -> i64 {
        unsafe { jni_call!(self.env, GetLongField, object, field) }.unwrap_or(0)
    }

    fn delete_local_ref(&self, reference: jobject) {
        unsafe {
            jni_call!(self.env, DeleteLocalRef, reference);
        }
    }

    fn take_pending_error(&self) -> bool {
        if !self.has_pending_error() {
            return false;
        }
        unsafe {
            if log::log_enabled!(log::Level::Debug) {
                jni_call!(self.env, ExceptionDescribe);
            }
            jni_call!(self.env, ExceptionClear);
        }
        true
    }
}

impl JniEngine {
    fn has_pending_error(&self) -> bool {
        (unsafe { jni_call!(self.env, ExceptionCheck) }) == Some(JNI_TRUE)
    }

    /// `CallStaticIntMethodA(class, method, arg)`. Leaves any raised exception pending.
    pub fn call_static_int(&self, class: jclass, method: jmethodID, arg: jint) -> jint {
        let args = [jvalue { i: arg }];
        unsafe { jni_call!(self.env, CallStaticIntMethodA, class, method, args.as_ptr()) }
            .unwrap_or(0)
    }
}
