use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{AuthState, CredentialError, CredentialStore};

const CREDS_FILE: &str = "creds.json";
const CREDS_TMP_FILE: &str = "creds.json.tmp";

/// File-based credential storage at `<dir>/creds.json`.
///
/// Writes go through a temporary file and a rename so a crash mid-rotation
/// never leaves a truncated file behind.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(CREDS_TMP_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<AuthState>, CredentialError> {
        let path = self.path();
        let data = match fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored credentials");
                return Ok(None);
            },
            Err(e) => return Err(CredentialError::io(path, e)),
        };

        match serde_json::from_str(&data) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // Unusable key material is equivalent to none: pair again.
                warn!(path = %path.display(), error = %e, "stored credentials are corrupt, ignoring");
                Ok(None)
            },
        }
    }

    fn save(&self, state: &AuthState) -> Result<(), CredentialError> {
        fs::create_dir_all(&self.dir).map_err(|e| CredentialError::io(&self.dir, e))?;

        let data = serde_json::to_string_pretty(state)?;
        let tmp = self.tmp_path();
        write_private(&tmp, data.as_bytes()).map_err(|e| CredentialError::io(&tmp, e))?;

        let path = self.path();
        fs::rename(&tmp, &path).map_err(|e| CredentialError::io(&path, e))?;
        debug!(path = %path.display(), "saved credentials");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        for path in [self.path(), self.tmp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed credentials"),
                Err(e) if e.kind() == ErrorKind::NotFound => {},
                Err(e) => return Err(CredentialError::io(path, e)),
            }
        }
        Ok(())
    }
}

/// Write `data` to a fresh file only the owner can read.
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // A leftover tmp file keeps its old mode; `mode` only applies on create.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(data)?;
    file.sync_all()
}
