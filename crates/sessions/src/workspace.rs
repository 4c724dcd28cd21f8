//! Per-session working directories and whitelisted overrides.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("agent returned an unusable session id: {0:?}")]
    InvalidSessionId(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Allocates managed session directories under `base` and validates
/// caller-supplied overrides against the whitelist.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base: PathBuf,
    whitelist: Vec<PathBuf>,
}

impl WorkspaceManager {
    pub fn new(base: impl Into<PathBuf>, whitelist: Vec<PathBuf>) -> Self {
        let base = base.into();
        let base = std::path::absolute(&base).unwrap_or(base);
        let whitelist = whitelist
            .into_iter()
            .filter(|p| p.is_absolute())
            .map(|p| normalize(&p))
            .collect();
        Self { base, whitelist }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Accept `raw` as a workspace override if it is absolute and lies
    /// within a whitelist entry after normalization. Rejections are logged
    /// and yield `None`.
    pub fn validate_override(&self, raw: &str) -> Option<PathBuf> {
        let candidate = Path::new(raw.trim());
        if !candidate.is_absolute() {
            warn!(path = raw, "workspace override rejected: not absolute");
            return None;
        }
        let normalized = normalize(candidate);
        if self.whitelist.is_empty() {
            warn!(path = %normalized.display(), "workspace override rejected: whitelist is empty");
            return None;
        }
        if !self
            .whitelist
            .iter()
            .any(|allowed| normalized.starts_with(allowed))
        {
            warn!(path = %normalized.display(), "workspace override rejected: outside whitelist");
            return None;
        }
        debug!(path = %normalized.display(), "workspace override accepted");
        Some(normalized)
    }

    /// Create a fresh `temp_<uuid>` directory for a session whose id is not
    /// yet known.
    pub fn allocate_temp(&self) -> Result<PathBuf, WorkspaceError> {
        let dir = self
            .base
            .join(format!("temp_{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(dir)
    }

    /// Rename a temp directory to `<base>/<session_id>`. A stale directory
    /// already at the target is replaced.
    pub fn finalize(&self, temp: &Path, session_id: &str) -> Result<PathBuf, WorkspaceError> {
        if !is_valid_session_id(session_id) {
            return Err(WorkspaceError::InvalidSessionId(session_id.to_string()));
        }
        let target = self.base.join(session_id);
        if target.exists() {
            warn!(path = %target.display(), "workspace directory already exists, replacing");
            fs::remove_dir_all(&target).map_err(io_err(&target))?;
        }
        fs::rename(temp, &target).map_err(io_err(temp))?;
        debug!(from = %temp.display(), to = %target.display(), "workspace finalized");
        Ok(target)
    }

    /// Best-effort removal of a temp directory after a failed creation.
    pub fn discard(&self, temp: &Path) {
        if let Err(e) = fs::remove_dir_all(temp)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %temp.display(), error = %e, "failed to remove temp workspace");
        }
    }

    /// Re-create a directory that vanished since the session was created.
    pub fn ensure(&self, dir: &Path) -> Result<(), WorkspaceError> {
        if dir.is_dir() {
            return Ok(());
        }
        debug!(path = %dir.display(), "re-creating missing workspace");
        fs::create_dir_all(dir).map_err(io_err(dir))
    }

    /// Remove every managed directory. Returns whether anything existed.
    pub fn clear_all(&self) -> Result<bool, WorkspaceError> {
        remove_tree(&self.base)
    }
}

/// `remove_dir_all` that treats a missing directory as success.
pub fn remove_tree(path: &Path) -> Result<bool, WorkspaceError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(path)(e)),
    }
}

fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.chars().any(char::is_control)
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn manager(whitelist: &[&str]) -> WorkspaceManager {
        WorkspaceManager::new(
            "/tmp/relay-test-base",
            whitelist.iter().map(PathBuf::from).collect(),
        )
    }

    #[rstest]
    #[case("/home/user", true)]
    #[case("/home/user/project", true)]
    #[case("/home/user/./project/../other", true)]
    #[case("/home/user2", false)]
    #[case("/home/user/../../etc", false)]
    #[case("/etc/passwd", false)]
    #[case("home/user/project", false)]
    #[case("  /home/user/project  ", true)]
    fn override_validation(#[case] raw: &str, #[case] accepted: bool) {
        let ws = manager(&["/home/user", "/srv/data/"]);
        assert_eq!(ws.validate_override(raw).is_some(), accepted, "{raw}");
    }

    #[test]
    fn override_is_normalized() {
        let ws = manager(&["/srv/data"]);
        assert_eq!(
            ws.validate_override("/srv/data/a/./b/../c"),
            Some(PathBuf::from("/srv/data/a/c"))
        );
    }

    #[test]
    fn empty_whitelist_rejects_everything() {
        let ws = manager(&[]);
        assert!(ws.validate_override("/").is_none());
        assert!(ws.validate_override("/home/user").is_none());
    }

    #[test]
    fn relative_whitelist_entries_are_ignored() {
        let ws = manager(&["relative"]);
        assert!(ws.validate_override("/relative").is_none());
    }

    #[test]
    fn temp_then_finalize() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path().join("workspaces"), Vec::new());

        let temp = ws.allocate_temp().unwrap();
        assert!(temp.is_dir());
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("temp_"));
        fs::write(temp.join("state"), "x").unwrap();

        let final_dir = ws.finalize(&temp, "abc-123").unwrap();
        assert_eq!(final_dir, ws.base().join("abc-123"));
        assert!(!temp.exists());
        assert!(final_dir.join("state").exists());
    }

    #[test]
    fn finalize_replaces_stale_target() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path(), Vec::new());
        fs::create_dir_all(root.path().join("sid")).unwrap();
        fs::write(root.path().join("sid/old"), "x").unwrap();

        let temp = ws.allocate_temp().unwrap();
        let dir = ws.finalize(&temp, "sid").unwrap();
        assert!(!dir.join("old").exists());
    }

    #[rstest]
    #[case("")]
    #[case("..")]
    #[case("../escape")]
    #[case("a/b")]
    #[case("line\nbreak")]
    fn finalize_rejects_bad_ids(#[case] id: &str) {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path(), Vec::new());
        let temp = ws.allocate_temp().unwrap();
        assert!(matches!(
            ws.finalize(&temp, id),
            Err(WorkspaceError::InvalidSessionId(_))
        ));
        ws.discard(&temp);
        assert!(!temp.exists());
    }

    #[test]
    fn ensure_recreates_and_clear_removes() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path().join("ws"), Vec::new());
        let dir = ws.base().join("gone");
        ws.ensure(&dir).unwrap();
        assert!(dir.is_dir());

        assert!(ws.clear_all().unwrap());
        assert!(!ws.base().exists());
        assert!(!ws.clear_all().unwrap());
    }
}
