//! JSON file credential backend.
//!
//! The whole file is loaded on open and rewritten after every change. Writes go
//! to a sibling temp file first and are renamed into place so a crash never
//! leaves a truncated store behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::traits::{AuthInfo, AuthInfoBackend};
use crate::error::PersistenceError;

/// url -> realm -> bucket
type FileContents = BTreeMap<String, BTreeMap<String, AuthInfo>>;

/// File-backed implementation of [`AuthInfoBackend`].
#[derive(Debug)]
pub struct FileAuthBackend {
    path: PathBuf,
    contents: Mutex<FileContents>,
}

impl FileAuthBackend {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => FileContents::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => FileContents::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened credential file {:?} with {} location(s)", path, contents.len());

        Ok(Self {
            path,
            contents: Mutex::new(contents),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, FileContents> {
        self.contents.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, contents: &FileContents) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(contents)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl AuthInfoBackend for FileAuthBackend {
    fn get_auth_info(&self, url: &str, realm: &str) -> Result<Option<AuthInfo>, PersistenceError> {
        Ok(self
            .lock()
            .get(url)
            .and_then(|realms| realms.get(realm))
            .cloned())
    }

    fn set_auth_info(&self, url: &str, realm: &str, info: AuthInfo) -> Result<(), PersistenceError> {
        let mut contents = self.lock();
        contents
            .entry(url.to_string())
            .or_default()
            .insert(realm.to_string(), info);
        self.write(&contents)
    }

    fn flush_auth_info(&self, url: &str, realm: &str) -> Result<(), PersistenceError> {
        let mut contents = self.lock();
        let removed = match contents.get_mut(url) {
            Some(realms) => {
                let removed = realms.remove(realm).is_some();
                if realms.is_empty() {
                    contents.remove(url);
                }
                removed
            }
            None => false,
        };

        if removed {
            self.write(&contents)?;
        }
        Ok(())
    }
}
