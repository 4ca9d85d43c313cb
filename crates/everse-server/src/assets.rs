//! Default viewer bundle written into the web root.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ServerError;

const INDEX_HTML: &str = include_str!("../assets/index.html");
const WS_CLIENT_JS: &str = include_str!("../assets/js/ws-client.js");

/// Files of the bundle, relative to the web root.
pub const BUNDLE: &[(&str, &str)] = &[("index.html", INDEX_HTML), ("js/ws-client.js", WS_CLIENT_JS)];

/// What `ensure_default_assets` did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetReport {
    /// Files newly written.
    pub written: Vec<PathBuf>,
    /// Files left untouched because they already existed.
    pub kept: Vec<PathBuf>,
}

/// Create `root` and write each bundled file that is missing.
/// Existing files are never overwritten.
pub fn ensure_default_assets(root: &Path) -> Result<AssetReport, ServerError> {
    let mut report = AssetReport::default();
    for (relative, contents) in BUNDLE {
        let path = root.join(relative);
        if path.exists() {
            debug!(path = %path.display(), "asset present, keeping");
            report.kept.push(path);
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServerError::Asset(format!("create {}: {e}", parent.display())))?;
        }
        std::fs::write(&path, contents)
            .map_err(|e| ServerError::Asset(format!("write {}: {e}", path.display())))?;
        info!(path = %path.display(), "wrote default asset");
        report.written.push(path);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_bundle_into_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("wwwroot");

        let report = ensure_default_assets(&root).unwrap();
        assert_eq!(report.written.len(), 2);
        assert!(report.kept.is_empty());
        assert!(root.join("index.html").is_file());
        let js = std::fs::read_to_string(root.join("js/ws-client.js")).unwrap();
        assert!(js.contains("/ws?token="));
    }

    #[test]
    fn second_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        ensure_default_assets(dir.path()).unwrap();
        let report = ensure_default_assets(dir.path()).unwrap();
        assert!(report.written.is_empty());
        assert_eq!(report.kept.len(), 2);
    }

    #[test]
    fn existing_files_are_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "custom").unwrap();

        let report = ensure_default_assets(dir.path()).unwrap();
        assert_eq!(report.written, vec![dir.path().join("js/ws-client.js")]);
        assert_eq!(std::fs::read_to_string(dir.path().join("index.html")).unwrap(), "custom");
    }

    #[test]
    fn index_references_client_script() {
        assert!(INDEX_HTML.contains("/js/ws-client.js"));
        assert!(WS_CLIENT_JS.contains("secret-token"));
    }
}
