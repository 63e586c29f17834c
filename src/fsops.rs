use crate::config::VaultSettings;
use crate::errors::{VaultError, VaultResult};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// `<name>~<unix millis>` as appended by soft deletes. Slugs never contain `~`,
/// so live names such as `Archive_2024010112345` are left alone.
static TRASH_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<name>.+)~(?P<millis>\d{13})$").expect("valid trash token regex"));

const MAX_SUFFIX_ATTEMPTS: usize = 10_000;

pub fn slugify(title: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' {
            pending_dash = true;
        }
    }
    slug.truncate(max_len);
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn unique_child_path(parent: &Path, base: &str, infix: &str) -> VaultResult<PathBuf> {
    unique_child_path_with(parent, base, infix, |candidate| candidate.exists())
}

pub fn unique_child_path_with<F>(parent: &Path, base: &str, infix: &str, taken: F) -> VaultResult<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    let first = parent.join(base);
    if !taken(&first) {
        return Ok(first);
    }
    for counter in 1..=MAX_SUFFIX_ATTEMPTS {
        let candidate = parent.join(format!("{}{}{}", base, infix, counter));
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(VaultError::DuplicateName(format!(
        "no free name for '{}' under {}",
        base,
        parent.to_string_lossy()
    )))
}

/// Absolute, lexically normalized form of a configured root. Relative roots
/// are anchored at `base`; `.` is dropped and `..` pops a segment.
pub fn normalize_root_from(base: &Path, root: &Path) -> PathBuf {
    let anchored = if root.is_absolute() { root.to_path_buf() } else { base.join(root) };
    let mut normalized = PathBuf::new();
    for component in anchored.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

pub fn normalize_root(root: &Path) -> VaultResult<PathBuf> {
    Ok(normalize_root_from(&std::env::current_dir()?, root))
}

pub fn resolve_in_root(root: &Path, raw: &Path) -> VaultResult<PathBuf> {
    if raw.components().any(|component| matches!(component, Component::ParentDir)) {
        return Err(VaultError::Validation(format!(
            "path must not contain '..': {}",
            raw.to_string_lossy()
        )));
    }
    let resolved = if raw.is_absolute() { raw.to_path_buf() } else { root.join(raw) };
    let normalized: PathBuf = resolved
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect();
    if !normalized.starts_with(root) {
        return Err(VaultError::Validation(format!(
            "path is outside the vault: {}",
            raw.to_string_lossy()
        )));
    }
    Ok(normalized)
}

pub fn is_item_dir(settings: &VaultSettings, dir: &Path) -> bool {
    settings.meta_path(dir).is_file()
}

pub fn is_in_trash(settings: &VaultSettings, path: &Path) -> bool {
    path.starts_with(settings.trash_path())
}

pub fn file_name_of(path: &Path) -> VaultResult<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| VaultError::Validation(format!("path has no final component: {}", path.to_string_lossy())))
}

pub fn is_not_found(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::NotFound
}

pub fn trash_target(trash_dir: &Path, name: &str, now: DateTime<Utc>) -> PathBuf {
    let mut millis = now.timestamp_millis();
    loop {
        let candidate = trash_dir.join(format!("{}~{}", name, millis));
        if !candidate.exists() {
            return candidate;
        }
        millis += 1;
    }
}

pub fn strip_trash_token(name: &str) -> (String, Option<DateTime<Utc>>) {
    let Some(captures) = TRASH_TOKEN_RE.captures(name) else {
        return (name.to_string(), None);
    };
    let original = captures["name"].to_string();
    let deleted_at = captures["millis"]
        .parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
    (original, deleted_at)
}

pub fn relocate_dir(from: &Path, to: &Path) -> io::Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(false),
        Err(error) if should_copy_instead(&error) => {
            tracing::warn!(
                from = %from.to_string_lossy(),
                to = %to.to_string_lossy(),
                error = %error,
                "rename refused; relocating via copy and remove"
            );
            if let Err(copy_error) = copy_dir_all(from, to) {
                let _ = fs::remove_dir_all(to);
                return Err(copy_error);
            }
            fs::remove_dir_all(from)?;
            Ok(true)
        }
        Err(error) => Err(error),
    }
}

fn should_copy_instead(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::PermissionDenied || matches!(error.raw_os_error(), Some(16 | 18))
}

pub fn copy_dir_all(from: &Path, to: &Path) -> io::Result<()> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((source, target)) = pending.pop() {
        fs::create_dir_all(&target)?;
        for entry in fs::read_dir(&source)? {
            let entry = entry?;
            let destination = target.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                pending.push((entry.path(), destination));
            } else {
                fs::copy(entry.path(), destination)?;
            }
        }
    }
    Ok(())
}

/// Writes through a hidden sibling temp file and renames it into place. The
/// parent directory must already exist; a vanished item is never recreated.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> VaultResult<()> {
    let name = file_name_of(path)?;
    let tmp = path.with_file_name(format!(".{}.tmp", name));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|error| {
        let _ = fs::remove_file(&tmp);
        VaultError::from(error)
    })
}

pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> VaultResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> VaultResult<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if is_not_found(&error) => {
            return Err(VaultError::NotFound(path.to_string_lossy().to_string()));
        }
        Err(error) => return Err(error.into()),
    };
    serde_json::from_slice(&bytes).map_err(|error| {
        VaultError::Validation(format!("malformed json in {}: {}", path.to_string_lossy(), error))
    })
}

pub fn sorted_subdirs(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        dirs.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(dirs)
}

pub fn relative_slash_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|relative| {
            relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slugify_follows_filesystem_rules() {
        assert_eq!(slugify("Note", 50), "note");
        assert_eq!(slugify("  Hello,   World! ", 50), "hello-world");
        assert_eq!(slugify("a -- b", 50), "a-b");
        assert_eq!(slugify("C++ & Rust_2024", 50), "c-rust2024");
        assert_eq!(slugify("日本語", 50), "untitled");
        assert_eq!(slugify(&"x".repeat(80), 50).len(), 50);
        assert_eq!(slugify("abc def", 4), "abc");
    }

    #[test]
    fn unique_child_path_appends_numeric_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("note")).expect("seed");
        fs::create_dir(dir.path().join("note_1")).expect("seed");
        let path = unique_child_path(dir.path(), "note", "_").expect("free path");
        assert_eq!(path, dir.path().join("note_2"));
    }

    #[test]
    fn resolve_in_root_rejects_escapes() {
        let root = Path::new("/vault");
        assert_eq!(
            resolve_in_root(root, Path::new("A/B")).expect("relative"),
            PathBuf::from("/vault/A/B")
        );
        assert_eq!(
            resolve_in_root(root, Path::new("/vault/./A")).expect("absolute"),
            PathBuf::from("/vault/A")
        );
        assert!(resolve_in_root(root, Path::new("../etc")).is_err());
        assert!(resolve_in_root(root, Path::new("/elsewhere/A")).is_err());
        assert!(resolve_in_root(root, Path::new("/vault2/A")).is_err());
    }

    #[test]
    fn normalize_root_anchors_and_folds_dots() {
        let base = Path::new("/work");
        assert_eq!(normalize_root_from(base, Path::new("./vault")), PathBuf::from("/work/vault"));
        assert_eq!(normalize_root_from(base, Path::new("x/../vault")), PathBuf::from("/work/vault"));
        assert_eq!(normalize_root_from(base, Path::new("/data/./a/../vault/.")), PathBuf::from("/data/vault"));
        assert_eq!(normalize_root_from(base, Path::new("/../vault")), PathBuf::from("/vault"));

        let root = normalize_root_from(base, Path::new("x/../vault"));
        let child = resolve_in_root(&root, Path::new("A")).expect("inside");
        assert_eq!(resolve_in_root(&root, &child).expect("round trip"), child);
    }

    #[test]
    fn trash_token_roundtrip() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("timestamp");
        let dir = tempfile::tempdir().expect("tempdir");
        let first = trash_target(dir.path(), "note_1", now);
        fs::create_dir(&first).expect("occupy");
        let second = trash_target(dir.path(), "note_1", now);
        assert_ne!(first, second);

        let name = first.file_name().expect("name").to_string_lossy().to_string();
        let (original, deleted_at) = strip_trash_token(&name);
        assert_eq!(original, "note_1");
        assert_eq!(deleted_at, Some(now));

        assert_eq!(strip_trash_token("plain_12"), ("plain_12".to_string(), None));
        assert_eq!(
            strip_trash_token("Archive_2024010112345"),
            ("Archive_2024010112345".to_string(), None)
        );
        assert_eq!(strip_trash_token("note~12345"), ("note~12345".to_string(), None));
    }

    #[test]
    fn relocate_and_copy_preserve_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("a");
        fs::create_dir_all(source.join("nested")).expect("mkdir");
        fs::write(source.join("nested/file.txt"), "hello").expect("write");

        let copy = dir.path().join("copy");
        copy_dir_all(&source, &copy).expect("copy");
        assert_eq!(fs::read_to_string(copy.join("nested/file.txt")).expect("read"), "hello");

        let moved = dir.path().join("b");
        let used_fallback = relocate_dir(&source, &moved).expect("relocate");
        assert!(!used_fallback);
        assert!(!source.exists());
        assert!(moved.join("nested/file.txt").exists());
    }

    #[test]
    fn relative_slash_path_joins_segments() {
        let root = Path::new("/vault");
        assert_eq!(relative_slash_path(root, Path::new("/vault/A/B")), "A/B");
        assert_eq!(relative_slash_path(root, Path::new("/vault")), "");
    }
}
