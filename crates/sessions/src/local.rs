//! CLI-side session state kept in a local directory.
//!
//! `session_id.txt` pins the session id a CLI user keeps across runs;
//! `thread_id.txt` remembers the last thread as a fallback for when the
//! continuity store is unreachable.

use std::path::{Path, PathBuf};

use tl_domain::error::{Error, Result};
use tl_domain::ids;

const SESSION_FILE: &str = "session_id.txt";
const THREAD_FILE: &str = "thread_id.txt";

#[derive(Debug, Clone)]
pub struct LocalState {
    dir: PathBuf,
}

impl LocalState {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Return the pinned session id, minting and saving one on first use.
    pub fn load_or_create_session_id(&self) -> Result<String> {
        if let Some(existing) = read_trimmed(&self.dir.join(SESSION_FILE))? {
            if ids::validate_session_id(&existing).is_ok() {
                return Ok(existing);
            }
            tracing::warn!(
                path = %self.dir.join(SESSION_FILE).display(),
                "ignoring invalid saved session id"
            );
        }
        let session_id = ids::new_session_id();
        self.write(SESSION_FILE, &session_id)?;
        Ok(session_id)
    }

    pub fn load_thread_id(&self) -> Result<Option<String>> {
        read_trimmed(&self.dir.join(THREAD_FILE))
    }

    pub fn save_thread_id(&self, thread_id: &str) -> Result<()> {
        self.write(THREAD_FILE, thread_id)
    }

    fn write(&self, name: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(name), value).map_err(Error::Io)
    }
}

fn read_trimmed(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let v = raw.trim();
            Ok((!v.is_empty()).then(|| v.to_owned()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}
