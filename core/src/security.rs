//! Path-safety boundary for generated plugin projects.
//!
//! Spec §6 Security: a plugin's project directory must never resolve
//! outside the configured project root, and must never collide with a
//! small set of reserved system paths.

use std::path::{Path, PathBuf};

use crate::error::{ForgeError, ForgeResult};

const RESERVED_PREFIXES: &[&str] = &["/etc", "/usr", "/bin", "/sbin", "/proc", "/sys", "/root"];

/// Resolves `<project_root>/<user_id>/<plugin_name>` and rejects it if it
/// escapes `project_root` (via `..`, absolute overrides embedded in
/// `plugin_name`, or symlink-free lexical traversal) or lands on a
/// reserved system path.
pub fn resolve_project_path(
    project_root: &Path,
    user_id: &str,
    plugin_name: &str,
) -> ForgeResult<PathBuf> {
    if user_id.is_empty() || plugin_name.is_empty() {
        return Err(ForgeError::Validation(
            "userId and pluginName must be non-empty".into(),
        ));
    }
    if contains_traversal(user_id) || contains_traversal(plugin_name) {
        return Err(ForgeError::Validation(format!(
            "path traversal rejected in userId/pluginName: {user_id}/{plugin_name}"
        )));
    }

    let joined = project_root.join(user_id).join(plugin_name);
    let normalized = lexically_normalize(&joined);
    let normalized_root = lexically_normalize(project_root);

    if !normalized.starts_with(&normalized_root) {
        return Err(ForgeError::Validation(format!(
            "resolved path {} escapes project root {}",
            normalized.display(),
            normalized_root.display()
        )));
    }

    let as_str = normalized.to_string_lossy();
    if RESERVED_PREFIXES.iter().any(|p| as_str.starts_with(p)) {
        return Err(ForgeError::Validation(format!(
            "resolved path {as_str} collides with a reserved system path"
        )));
    }

    Ok(normalized)
}

/// Joins `relative` onto `root`, rejecting `..` segments, null bytes, and
/// absolute overrides so a generated file can never land outside the
/// project root (spec property 10).
pub fn safe_join(root: &Path, relative: &str) -> ForgeResult<PathBuf> {
    if contains_traversal(relative) {
        return Err(ForgeError::Validation(format!(
            "path traversal rejected in generated file path: {relative}"
        )));
    }
    if Path::new(relative).is_absolute() {
        return Err(ForgeError::Validation(format!(
            "absolute path rejected in generated file path: {relative}"
        )));
    }
    Ok(root.join(relative))
}

fn contains_traversal(segment: &str) -> bool {
    segment.split(['/', '\\']).any(|part| part == "..") || segment.contains('\0')
}

fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            ParentDir => {
                out.pop();
            }
            CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_path_accepted() {
        let root = PathBuf::from("/cwd/generated");
        let p = resolve_project_path(&root, "user-1", "Welcomer").unwrap();
        assert_eq!(p, PathBuf::from("/cwd/generated/user-1/Welcomer"));
    }

    #[test]
    fn test_traversal_rejected() {
        let root = PathBuf::from("/cwd/generated");
        assert!(resolve_project_path(&root, "../etc", "Welcomer").is_err());
        assert!(resolve_project_path(&root, "user-1", "../../etc/passwd").is_err());
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let root = PathBuf::from("/etc");
        assert!(resolve_project_path(&root, "user-1", "x").is_err());
    }

    #[test]
    fn test_empty_segments_rejected() {
        let root = PathBuf::from("/cwd/generated");
        assert!(resolve_project_path(&root, "", "Welcomer").is_err());
        assert!(resolve_project_path(&root, "user-1", "").is_err());
    }

    #[test]
    fn test_safe_join_accepts_relative_path() {
        let root = PathBuf::from("/cwd/generated/user-1/Welcomer");
        let p = safe_join(&root, "src/main/java/com/generated/welcomer/Main.java").unwrap();
        assert_eq!(p, root.join("src/main/java/com/generated/welcomer/Main.java"));
    }

    #[test]
    fn test_safe_join_rejects_traversal() {
        let root = PathBuf::from("/cwd/generated/user-1/Welcomer");
        assert!(safe_join(&root, "../../../etc/passwd").is_err());
    }

    #[test]
    fn test_safe_join_rejects_absolute_path() {
        let root = PathBuf::from("/cwd/generated/user-1/Welcomer");
        assert!(safe_join(&root, "/etc/passwd").is_err());
    }
}
