use std::sync::{Mutex, OnceLock};

/// Every variable `Config::load` reads.
pub(crate) const ENV_KEYS: &[&str] = &[
    "TOOLBRIDGE_API_KEY",
    "TOOLBRIDGE_API_URL",
    "TOOLBRIDGE_MODEL",
    "TOOLBRIDGE_SERVER_COMMAND",
    "TOOLBRIDGE_SERVER_PATH",
    "OPENAI_API_KEY",
    "GEMINI_API_KEY",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Locks process environment mutation for the entire test body.
pub(crate) fn with_locked_env<R>(run: impl FnOnce() -> R) -> R {
    let _guard = env_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    run()
}

/// Clears a set of variables and puts their previous values back on drop.
///
/// Only use inside `with_locked_env`.
pub(crate) struct ScopedEnv {
    saved: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    pub(crate) fn cleared(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| (key.to_string(), std::env::var(key).ok()))
            .collect();
        for key in keys {
            remove_env_var(key);
        }
        Self { saved }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(value) => set_env_var(key, value),
                None => remove_env_var(key),
            }
        }
    }
}

/// Set an environment variable in test contexts.
///
/// # Safety
/// These calls remain unsafe in this toolchain. Call sites should use
/// `with_locked_env` to avoid data races between parallel tests.
pub(crate) fn set_env_var(key: &str, value: &str) {
    // SAFETY: callers hold the env lock.
    unsafe {
        std::env::set_var(key, value);
    }
}

/// Remove an environment variable in test contexts.
pub(crate) fn remove_env_var(key: &str) {
    // SAFETY: callers hold the env lock.
    unsafe {
        std::env::remove_var(key);
    }
}
