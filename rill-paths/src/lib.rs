//! Storage directory layout for rill state stores.
//!
//! Every state store owns one directory. The layout is stable so that a
//! restarted topology finds its data again:
//!
//! `<root>/<app identity>/<topology id>/<sanitized(processor name # partition)>/`

use std::path::{Path, PathBuf};

/// Characters that are unsafe in a directory name on at least one supported
/// platform. Each is replaced by `_`.
const UNSAFE: &[char] = &['/', '?', '<', '>', '\\', ':', '*', '|', '"'];

/// Replace filesystem-unsafe characters in a processor or application name.
///
/// Record type names such as `[i32,alloc::string::String]` flow into store
/// names, so `:` and friends show up in practice.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE.contains(&c) { '_' } else { c })
        .collect()
}

/// Get the default rill data directory.
///
/// Returns `$RILL_DATA_DIR` if set (test isolation), otherwise
/// `$XDG_DATA_HOME/rill` or `~/.local/share/rill`.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RILL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("rill")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".local/share/rill")
    } else {
        PathBuf::from(".local/share/rill")
    }
}

/// Directory for one topology's stores.
#[must_use]
pub fn topology_dir(root: &Path, app_identity: &str, topology_id: &str) -> PathBuf {
    root.join(sanitize_name(app_identity))
        .join(sanitize_name(topology_id))
}

/// Directory for one state store, owned by `processor_name` on `partition`.
#[must_use]
pub fn store_dir(
    root: &Path,
    app_identity: &str,
    topology_id: &str,
    processor_name: &str,
    partition: i32,
) -> PathBuf {
    topology_dir(root, app_identity, topology_id)
        .join(sanitize_name(&format!("{processor_name}#{partition}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_name("a/b?c<d>e"), "a_b_c_d_e");
        assert_eq!(sanitize_name(r#"x\y:z*w|v"u"#), "x_y_z_w_v_u");
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(
            sanitize_name("count_by_key[i32,i64]#7"),
            "count_by_key[i32,i64]#7"
        );
    }

    #[test]
    fn store_dir_includes_partition() {
        let p = store_dir(Path::new("/data"), "app-1", "topology-0", "ktable(users)", 3);
        assert_eq!(
            p,
            PathBuf::from("/data/app-1/topology-0/ktable(users)#3")
        );
    }

    #[test]
    fn store_dir_sanitizes_every_segment() {
        let p = store_dir(Path::new("/data"), "app:prod", "t|0", "src/users", 0);
        assert_eq!(p, PathBuf::from("/data/app_prod/t_0/src_users#0"));
    }

    #[test]
    fn data_dir_respects_override() {
        unsafe {
            std::env::set_var("RILL_DATA_DIR", "/tmp/rill-test-data");
        }
        assert_eq!(data_dir(), PathBuf::from("/tmp/rill-test-data"));
        unsafe {
            std::env::remove_var("RILL_DATA_DIR");
        }
    }
}
