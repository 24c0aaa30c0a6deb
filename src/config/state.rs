// Application state module
// Holds the immutable per-process state shared by all connection tasks

use std::io;
use std::path::PathBuf;

use super::types::Config;

/// Application state
///
/// Constructed once at startup and shared behind an `Arc`. The responder
/// holds no mutable state, so no locking is involved.
pub struct AppState {
    pub config: Config,
    /// Canonicalized serving root; all resolved paths must stay below it
    pub root: PathBuf,
}

impl AppState {
    /// Create `AppState`, resolving the serving root to an absolute path
    ///
    /// Fails when the configured root does not exist or is not a directory,
    /// so a misconfigured process dies at startup instead of serving 404s.
    pub fn new(config: Config) -> io::Result<Self> {
        let root = PathBuf::from(&config.site.root).canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("serving root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self { config, root })
    }

    /// Base directory for the image route
    pub fn images_root(&self) -> PathBuf {
        self.root.join(&self.config.site.images_dir)
    }
}
