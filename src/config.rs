use crate::errors::{VaultError, VaultResult};
use crate::models::ModelConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const VAULT_PATH_ENV: &str = "VAULT_PATH";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    #[default]
    Fallback,
    OriginalThenFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    pub root: PathBuf,
    pub trash_dir: String,
    pub meta_file: String,
    pub content_file: String,
    pub fallback_category: String,
    pub import_category: String,
    pub restore_policy: RestorePolicy,
    pub trash_retention_days: u32,
    pub max_slug_len: usize,
    pub default_author: String,
    pub default_version: String,
    pub default_model_config: ModelConfig,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("vault"),
            trash_dir: "trash".to_string(),
            meta_file: "meta.json".to_string(),
            content_file: "content.md".to_string(),
            fallback_category: "Restored".to_string(),
            import_category: "Imported".to_string(),
            restore_policy: RestorePolicy::Fallback,
            trash_retention_days: 5,
            max_slug_len: 50,
            default_author: "User".to_string(),
            default_version: "1.0.0".to_string(),
            default_model_config: ModelConfig::default(),
        }
    }
}

impl VaultSettings {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn load(config_path: Option<&Path>) -> VaultResult<Self> {
        let mut settings = match config_path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path)?;
                serde_yaml::from_str::<Self>(&raw)?
            }
            _ => Self::default(),
        };
        if let Ok(raw) = std::env::var(VAULT_PATH_ENV) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                settings.root = PathBuf::from(trimmed);
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> VaultResult<()> {
        for (field, value) in [
            ("trash_dir", &self.trash_dir),
            ("meta_file", &self.meta_file),
            ("content_file", &self.content_file),
            ("fallback_category", &self.fallback_category),
            ("import_category", &self.import_category),
        ] {
            let value = value.trim();
            if value.is_empty() || value.contains('/') || value.contains('\\') || value.starts_with('.') {
                return Err(VaultError::Validation(format!(
                    "settings field '{}' must be a plain file name, got '{}'",
                    field, value
                )));
            }
        }
        if self.meta_file == self.content_file {
            return Err(VaultError::Validation(
                "meta_file and content_file must differ".to_string(),
            ));
        }
        if self.fallback_category == self.trash_dir || self.import_category == self.trash_dir {
            return Err(VaultError::Validation(format!(
                "'{}' is reserved for the trash",
                self.trash_dir
            )));
        }
        if self.max_slug_len == 0 {
            return Err(VaultError::Validation("max_slug_len must be positive".to_string()));
        }
        Ok(())
    }

    pub fn trash_path(&self) -> PathBuf {
        self.root.join(&self.trash_dir)
    }

    pub fn meta_path(&self, item_dir: &Path) -> PathBuf {
        item_dir.join(&self.meta_file)
    }

    pub fn content_path(&self, item_dir: &Path) -> PathBuf {
        item_dir.join(&self.content_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reads_yaml_and_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("vault.yaml");
        let root = dir.path().join("notes");
        fs::write(
            &config_path,
            format!(
                "root: {}\nfallback_category: Recovered\nrestore_policy: original_then_fallback\n",
                root.to_string_lossy()
            ),
        )
        .expect("write config");

        let settings = VaultSettings::load(Some(&config_path)).expect("load settings");
        if std::env::var(VAULT_PATH_ENV).is_err() {
            assert_eq!(settings.root, root);
        }
        assert_eq!(settings.fallback_category, "Recovered");
        assert_eq!(settings.restore_policy, RestorePolicy::OriginalThenFallback);
        assert_eq!(settings.trash_dir, "trash");
        assert_eq!(settings.max_slug_len, 50);
    }

    #[test]
    fn validate_rejects_trash_as_fallback() {
        let mut settings = VaultSettings::for_root("/tmp/vault");
        settings.fallback_category = "trash".to_string();
        let error = settings.validate().expect_err("reserved name");
        assert!(error.to_string().starts_with("VALIDATION"));
    }

    #[test]
    fn validate_rejects_nested_file_names() {
        let mut settings = VaultSettings::for_root("/tmp/vault");
        settings.meta_file = "nested/meta.json".to_string();
        assert!(settings.validate().is_err());
    }
}
