//! Log backend setup.
//!
//! On Android records go to logcat under the `ArtPatch` tag; elsewhere
//! `env_logger` writes to stderr. Both honor `ARTPATCH_LOG` filter syntax.

use std::sync::Once;

use log::Level;

pub const LOG_ENV: &str = "ARTPATCH_LOG";
pub const DEBUG_ENV: &str = "ARTPATCH_DEBUG";
pub const LOG_TAG: &str = "ArtPatch";

const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// Filter directive: `ARTPATCH_DEBUG` beats `ARTPATCH_LOG`, which beats `info`.
pub(crate) fn filter_spec(log_var: Option<&str>, debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    match log_var.map(str::trim) {
        Some(spec) if !spec.is_empty() => spec.to_string(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// `android_LogPriority` for a record level.
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub(crate) fn android_priority(level: Level) -> i32 {
    match level {
        Level::Error => 6,
        Level::Warn => 5,
        Level::Info => 4,
        Level::Debug => 3,
        Level::Trace => 2,
    }
}

/// Install the backend once per process. Later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let log_var = std::env::var(LOG_ENV).ok();
        let debug = std::env::var_os(DEBUG_ENV).is_some();
        let spec = filter_spec(log_var.as_deref(), debug);
        install(&spec);
    });
}

#[cfg(target_os = "android")]
fn install(spec: &str) {
    let filter = env_logger::filter::Builder::new().parse(spec).build();
    let max_level = filter.filter();
    if log::set_boxed_logger(Box::new(logcat::LogcatLogger { filter })).is_ok() {
        log::set_max_level(max_level);
    }
}

#[cfg(not(target_os = "android"))]
fn install(spec: &str) {
    let _ = env_logger::Builder::new().parse_filters(spec).try_init();
}

#[cfg(target_os = "android")]
mod logcat {
    use std::ffi::CString;
    use std::os::raw::{c_char, c_int};

    use log::{Log, Metadata, Record};

    use super::{android_priority, LOG_TAG};

    #[link(name = "log")]
    extern "C" {
        fn __android_log_write(prio: c_int, tag: *const c_char, text: *const c_char) -> c_int;
    }

    pub(super) struct LogcatLogger {
        pub(super) filter: env_logger::filter::Filter,
    }

    impl Log for LogcatLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            self.filter.enabled(metadata)
        }

        fn log(&self, record: &Record) {
            if !self.filter.matches(record) {
                return;
            }
            let message = format!("{}", record.args()).replace('\0', "\\0");
            let (Ok(tag), Ok(text)) = (CString::new(LOG_TAG), CString::new(message)) else {
                return;
            };
            unsafe {
                __android_log_write(android_priority(record.level()), tag.as_ptr(), text.as_ptr());
            }
        }

        fn flush(&self) {}
    }
}
