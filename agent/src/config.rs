//! Agent configuration.
//!
//! Defaults reproduce the Binder.getCallingUid experiment. A JSON document in
//! `ARTPATCH_CONFIG` (or a file named by `ARTPATCH_CONFIG_FILE`) overrides
//! any subset of fields.

use std::path::PathBuf;

use artpatch_intercept::layout::DEFAULT_SCAN_WINDOW;
use artpatch_intercept::EntryPointPolicy;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interceptor::MAX_SLOTS;

pub const CONFIG_ENV: &str = "ARTPATCH_CONFIG";
pub const CONFIG_FILE_ENV: &str = "ARTPATCH_CONFIG_FILE";

const MIN_SCAN_WINDOW: usize = 16;
const MAX_SCAN_WINDOW: usize = 512;

/// Signature every interceptor slot is built for.
pub const SUPPORTED_SIGNATURE: &str = "()I";

/// The callback is always invoked through `CallStaticIntMethodA` with one `int`.
pub const CALLBACK_SIGNATURE: &str = "(I)I";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan window {0} must be within 16..=512 bytes and pointer aligned")]
    InvalidScanWindow(usize),

    #[error("target {target}: {reason}")]
    UnsupportedTarget { target: String, reason: &'static str },

    #[error("callback {callback} must have signature (I)I, not {signature}")]
    UnsupportedCallback { callback: String, signature: String },

    #[error("{count} targets configured but only {max} interceptor slots exist")]
    TooManyTargets { count: usize, max: usize },

    #[error("'{0}' contains a NUL byte")]
    ContainsNul(String),
}

/// How the original native is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallConvention {
    /// Regular JNI: `(JNIEnv*, jclass)`.
    Normal,
    /// `@FastNative`: JNI arguments, no thread-state transition.
    Fast,
    /// `@CriticalNative`: no JNI arguments at all.
    #[default]
    Critical,
}

impl CallConvention {
    pub fn is_fast_path(self) -> bool {
        !matches!(self, CallConvention::Normal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPointMode {
    GenericTrampoline,
    Keep,
}

impl From<EntryPointMode> for EntryPointPolicy {
    fn from(mode: EntryPointMode) -> Self {
        match mode {
            EntryPointMode::GenericTrampoline => EntryPointPolicy::GenericTrampoline,
            EntryPointMode::Keep => EntryPointPolicy::Keep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    pub signature: String,
}

/// Static managed method receiving the original result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackSpec {
    pub class: String,
    pub name: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub class: String,
    pub method: String,
    pub signature: String,
    #[serde(default = "default_true")]
    pub is_static: bool,
    #[serde(default)]
    pub convention: CallConvention,
    /// Unset means: trampoline for fast-path conventions, keep for normal ones.
    #[serde(default)]
    pub entry_point: Option<EntryPointMode>,
}

fn default_true() -> bool {
    true
}

impl TargetSpec {
    pub fn label(&self) -> String {
        let class = self.class.rsplit('/').next().unwrap_or(&self.class);
        format!("{}.{}", class, self.method)
    }

    pub fn entry_policy(&self) -> EntryPointPolicy {
        match self.entry_point {
            Some(mode) => mode.into(),
            None if self.convention.is_fast_path() => EntryPointPolicy::GenericTrampoline,
            None => EntryPointPolicy::Keep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Class the probe method is registered on.
    pub owner_class: String,
    pub probe_method: MethodSpec,
    pub scan_window: usize,
    pub callback: Option<CallbackSpec>,
    pub targets: Vec<TargetSpec>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            owner_class: "com/test/gccrash/MainActivity".to_string(),
            probe_method: MethodSpec {
                name: "nativeMark".to_string(),
                signature: "()V".to_string(),
            },
            scan_window: DEFAULT_SCAN_WINDOW,
            callback: Some(CallbackSpec {
                class: "com/test/gccrash/MainActivity".to_string(),
                name: "onGetCallingUid".to_string(),
                signature: "(I)I".to_string(),
            }),
            targets: vec![TargetSpec {
                class: "android/os/Binder".to_string(),
                method: "getCallingUid".to_string(),
                signature: SUPPORTED_SIGNATURE.to_string(),
                is_static: true,
                convention: CallConvention::Critical,
                entry_point: None,
            }],
        }
    }
}

impl AgentConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let word = std::mem::size_of::<usize>();
        let in_range = (MIN_SCAN_WINDOW..=MAX_SCAN_WINDOW).contains(&self.scan_window);
        if !in_range || self.scan_window % word != 0 {
            return Err(ConfigError::InvalidScanWindow(self.scan_window));
        }
        if self.targets.len() > MAX_SLOTS {
            return Err(ConfigError::TooManyTargets {
                count: self.targets.len(),
                max: MAX_SLOTS,
            });
        }

        let mut names = vec![
            &self.owner_class,
            &self.probe_method.name,
            &self.probe_method.signature,
        ];
        if let Some(cb) = &self.callback {
            names.extend([&cb.class, &cb.name, &cb.signature]);
            if cb.signature != CALLBACK_SIGNATURE {
                return Err(ConfigError::UnsupportedCallback {
                    callback: format!("{}.{}", cb.class, cb.name),
                    signature: cb.signature.clone(),
                });
            }
        }
        for target in &self.targets {
            names.extend([&target.class, &target.method, &target.signature]);

            if target.signature != SUPPORTED_SIGNATURE {
                return Err(ConfigError::UnsupportedTarget {
                    target: target.label(),
                    reason: "only ()I interceptors are available",
                });
            }
            if !target.is_static {
                return Err(ConfigError::UnsupportedTarget {
                    target: target.label(),
                    reason: "only static methods can be hooked",
                });
            }
            if target.convention.is_fast_path() && target.entry_policy() == EntryPointPolicy::Keep {
                warn!(
                    "{} keeps its compiled entry point; its fast-path stub skips JNI setup",
                    target.label()
                );
            }
        }

        if let Some(bad) = names.into_iter().find(|s| s.contains('\0')) {
            return Err(ConfigError::ContainsNul(bad.clone()));
        }
        Ok(())
    }
}

fn load_from_env() -> Result<Option<AgentConfig>, ConfigError> {
    if let Ok(json) = std::env::var(CONFIG_ENV) {
        debug!("Loading config from {}", CONFIG_ENV);
        return AgentConfig::from_json(&json).map(Some);
    }
    if let Some(path) = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from) {
        debug!("Loading config from {}", path.display());
        let json =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?;
        return AgentConfig::from_json(&json).map(Some);
    }
    Ok(None)
}

/// Environment override if present and valid, otherwise the defaults.
pub fn load() -> AgentConfig {
    match load_from_env() {
        Ok(Some(config)) => config,
        Ok(None) => AgentConfig::default(),
        Err(e) => {
            error!("Ignoring invalid configuration: {}", e);
            AgentConfig::default()
        }
    }
}
