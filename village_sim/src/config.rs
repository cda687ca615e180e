//! Shared loading path for the JSON configuration documents (catalog,
//! appraisal table, routine templates).

use std::{
    env, fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Where a loaded document came from; `None` means the embedded builtin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    path: Option<PathBuf>,
}

impl ConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn is_builtin(&self) -> bool {
        self.path.is_none()
    }
}

/// Loads `T` from the file named by `env_var`, falling back to the builtin
/// when the variable is unset or the file cannot be used.
pub(crate) fn load_with_env_path<T, E>(
    env_var: &str,
    label: &'static str,
    builtin: fn() -> Arc<T>,
    from_file: fn(&Path) -> Result<T, E>,
) -> (Arc<T>, ConfigMetadata)
where
    E: fmt::Display,
{
    let override_path = env::var(env_var)
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from);

    if let Some(path) = override_path {
        match from_file(&path) {
            Ok(cfg) => {
                tracing::info!(
                    target: "village::config",
                    path = %path.display(),
                    "{label}.loaded=file"
                );
                return (Arc::new(cfg), ConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "village::config",
                    path = %path.display(),
                    error = %err,
                    "{label}.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "village::config", "{label}.loaded=builtin");
    (builtin(), ConfigMetadata::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin_value() -> Arc<u32> {
        Arc::new(7)
    }

    fn parse_file(path: &Path) -> Result<u32, String> {
        std::fs::read_to_string(path)
            .map_err(|err| err.to_string())?
            .trim()
            .parse::<u32>()
            .map_err(|err| err.to_string())
    }

    #[test]
    fn unset_variable_uses_builtin() {
        let (value, meta) = load_with_env_path(
            "VILLAGE_TEST_UNSET_CONFIG_PATH",
            "test_value",
            builtin_value,
            parse_file,
        );
        assert_eq!(*value, 7);
        assert!(meta.is_builtin());
    }

    #[test]
    fn unreadable_override_falls_back() {
        std::env::set_var(
            "VILLAGE_TEST_MISSING_CONFIG_PATH",
            "/definitely/not/here/value.json",
        );
        let (value, meta) = load_with_env_path(
            "VILLAGE_TEST_MISSING_CONFIG_PATH",
            "test_value",
            builtin_value,
            parse_file,
        );
        assert_eq!(*value, 7);
        assert_eq!(meta, ConfigMetadata::default());
    }

    #[test]
    fn readable_override_is_used() {
        let path = std::env::temp_dir().join(format!("village_cfg_{}.txt", std::process::id()));
        std::fs::write(&path, "42\n").expect("write temp config");
        std::env::set_var("VILLAGE_TEST_PRESENT_CONFIG_PATH", &path);
        let (value, meta) = load_with_env_path(
            "VILLAGE_TEST_PRESENT_CONFIG_PATH",
            "test_value",
            builtin_value,
            parse_file,
        );
        assert_eq!(*value, 42);
        assert_eq!(meta.path(), Some(&path));
        let _ = std::fs::remove_file(&path);
    }
}
