//! Shared utility functions used across the codebase.

use std::path::{Component, Path, PathBuf};

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// any other set value maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Truncate `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
///
/// Relative paths are joined onto the current directory. The filesystem is not
/// consulted, so the path need not exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_bool_parses_truthy_values() {
        std::env::set_var("TASKPILOT_UTIL_FLAG", "Yes");
        assert!(env_var_bool("TASKPILOT_UTIL_FLAG", false));
        std::env::set_var("TASKPILOT_UTIL_FLAG", "off");
        assert!(!env_var_bool("TASKPILOT_UTIL_FLAG", true));
        std::env::remove_var("TASKPILOT_UTIL_FLAG");
        assert!(env_var_bool("TASKPILOT_UTIL_FLAG", true));
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn normalize_path_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/srv/work/./logs/../.git/audit")),
            PathBuf::from("/srv/work/.git/audit")
        );
        assert!(normalize_path(Path::new("relative")).is_absolute());
    }
}
