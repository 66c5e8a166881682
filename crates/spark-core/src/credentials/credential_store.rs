use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConfigLocator;

use super::{CredentialsError, Token};

const ENVELOPE_VERSION: u32 = 1;

/// Persistence for the supertoken between process runs. Child tokens are
/// never stored; they are downscoped again on demand.
pub trait CredentialStore: Send + Sync {
    fn load(&self, profile: &str) -> Result<Option<Token>, CredentialsError>;
    fn save(&self, profile: &str, supertoken: &Token) -> Result<(), CredentialsError>;
    fn delete(&self, profile: &str) -> Result<(), CredentialsError>;
}

/// One supertoken file per profile under the user configuration directory.
///
/// Writes go to a sibling temp file that is renamed into place, so a reader
/// sees either the previous supertoken or the new one.
pub struct FileCredentialStore {
    locator: ConfigLocator,
}

#[derive(Debug, Serialize, Deserialize)]
struct SupertokenFile {
    version: u32,
    profile: String,
    saved_at: DateTime<Utc>,
    supertoken: Token,
}

impl FileCredentialStore {
    pub fn new(locator: ConfigLocator) -> Self {
        Self { locator }
    }

    pub fn with_default_locator() -> Result<Self, CredentialsError> {
        Ok(Self::new(ConfigLocator::new()?))
    }

    fn staging_path(path: &Path) -> PathBuf {
        path.with_extension("json.tmp")
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
    File::create(path)
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, profile: &str) -> Result<Option<Token>, CredentialsError> {
        let path = self.locator.credentials_file(profile);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: SupertokenFile = serde_json::from_str(&raw)?;
        if file.version != ENVELOPE_VERSION || file.profile != profile {
            warn!(
                path = %path.display(),
                version = file.version,
                stored_profile = %file.profile,
                "credentials: ignoring supertoken file written for another profile or format"
            );
            return Ok(None);
        }
        debug!(%profile, saved_at = %file.saved_at, "credentials: loaded persisted supertoken");
        Ok(Some(file.supertoken))
    }

    fn save(&self, profile: &str, supertoken: &Token) -> Result<(), CredentialsError> {
        let path = self.locator.credentials_file(profile);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(&SupertokenFile {
            version: ENVELOPE_VERSION,
            profile: profile.to_owned(),
            saved_at: Utc::now(),
            supertoken: supertoken.clone(),
        })?;

        let staging = Self::staging_path(&path);
        let mut file = create_private(&staging)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn delete(&self, profile: &str) -> Result<(), CredentialsError> {
        let path = self.locator.credentials_file(profile);
        for target in [Self::staging_path(&path), path] {
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
