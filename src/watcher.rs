//! Capability table hot reload
//!
//! Watches the directory holding the capability table and sends a freshly
//! parsed table whenever the file is created or modified. Editors often
//! replace files instead of writing in place, so the parent directory is
//! watched rather than the file itself.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::capabilities::CapabilityTable;

/// Live watch on a capability table file
///
/// Dropping the watcher stops delivery.
pub struct CapabilityWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl CapabilityWatcher {
    /// Start watching `path`, returning the receiving end for reloaded tables
    pub fn start(
        path: &Path,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CapabilityTable>), WatchError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| WatchError::InvalidPath(path.to_path_buf()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let table_path = path.to_path_buf();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if is_table_change(&event, &file_name) => {
                    debug!(kind = ?event.kind, "Capability table changed on disk");
                    match CapabilityTable::load(&table_path) {
                        Ok(table) => {
                            info!(entries = table.len(), "Capability table reloaded");
                            forward_reload(&tx, table);
                        }
                        Err(e) => warn!(error = %e, "Failed to reload capability table"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Capability watch error"),
            }
        })
        .map_err(WatchError::Notify)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(WatchError::Notify)?;

        info!(path = %path.display(), "Watching capability table");

        Ok((
            Self {
                _watcher: watcher,
                path: path.to_path_buf(),
            },
            rx,
        ))
    }

    /// File being watched
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Hand a reloaded table to the engine; false once the receiver is gone
fn forward_reload(tx: &mpsc::UnboundedSender<CapabilityTable>, table: CapabilityTable) -> bool {
    if tx.send(table).is_err() {
        trace!("Reload receiver closed, dropping capability table");
        return false;
    }
    true
}

/// True for create/modify events touching the table file
fn is_table_change(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

// ============================================================================
// Error Types
// ============================================================================

/// Watcher setup error
#[derive(Debug)]
pub enum WatchError {
    /// Path has no file name component
    InvalidPath(PathBuf),
    /// Underlying watcher failure
    Notify(notify::Error),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::InvalidPath(p) => write!(f, "Invalid watch path: {}", p.display()),
            WatchError::Notify(e) => write!(f, "Watch error: {}", e),
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchError::InvalidPath(_) => None,
            WatchError::Notify(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};

    fn table_name() -> OsString {
        OsString::from("DeviceCapabilities.csv")
    }

    #[test]
    fn test_modify_of_table_is_relevant() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/tmp/cfg/DeviceCapabilities.csv"));
        assert!(is_table_change(&event, &table_name()));
    }

    #[test]
    fn test_create_of_table_is_relevant() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/cfg/DeviceCapabilities.csv"));
        assert!(is_table_change(&event, &table_name()));
    }

    #[test]
    fn test_other_files_ignored() {
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/tmp/cfg/config.json"));
        assert!(!is_table_change(&event, &table_name()));
    }

    #[test]
    fn test_remove_and_access_ignored() {
        let path = PathBuf::from("/tmp/cfg/DeviceCapabilities.csv");
        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        let accessed = Event::new(EventKind::Access(AccessKind::Any)).add_path(path);
        assert!(!is_table_change(&removed, &table_name()));
        assert!(!is_table_change(&accessed, &table_name()));
    }

    #[test]
    fn test_forward_reload_after_receiver_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(forward_reload(&tx, CapabilityTable::new()));
        assert!(rx.try_recv().is_ok());

        drop(rx);
        assert!(!forward_reload(&tx, CapabilityTable::new()));
    }

    #[test]
    fn test_start_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("DeviceCapabilities.csv");
        assert!(matches!(
            CapabilityWatcher::start(&path),
            Err(WatchError::Notify(_))
        ));
    }

    #[test]
    fn test_start_rejects_path_without_file_name() {
        assert!(matches!(
            CapabilityWatcher::start(Path::new("/")),
            Err(WatchError::InvalidPath(_))
        ));
    }
}
