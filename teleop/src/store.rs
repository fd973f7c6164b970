use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Namespaced key/value documents, one `<namespace>.json` file per namespace.
#[derive(Clone, Debug)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }

    fn read(&self, namespace: &str) -> Result<Option<Map<String, Value>>> {
        let path = self.path(namespace);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence(&path, e)),
        };
        serde_json::from_str(&text).map(Some).map_err(|e| persistence(&path, e))
    }

    fn write(&self, namespace: &str, document: &Map<String, Value>) -> Result<()> {
        let path = self.path(namespace);
        fs::create_dir_all(&self.dir).map_err(|e| persistence(&self.dir, e))?;
        let text = serde_json::to_string_pretty(document).map_err(|e| persistence(&path, e))?;
        fs::write(&path, text).map_err(|e| persistence(&path, e))
    }

    /// Replaces one entry, keeping the rest of the document.
    pub fn save_value<T: Serialize>(&self, namespace: &str, name: &str, value: &T) -> Result<()> {
        let mut document = self
            .read(namespace)
            .unwrap_or_else(|e| {
                warn!("Discarding unreadable document: {}", e);
                None
            })
            .unwrap_or_default();
        let value = serde_json::to_value(value).map_err(|e| persistence(&self.path(namespace), e))?;
        document.insert(name.to_owned(), value);
        self.write(namespace, &document).inspect_err(|e| error!("{}", e))
    }

    /// Stored entry, if present and readable.
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, name: &str) -> Result<Option<T>> {
        let path = self.path(namespace);
        match self.read(namespace)?.and_then(|mut doc| doc.remove(name)) {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| persistence(&path, e)),
            None => Ok(None),
        }
    }

    /// Stored entry, or `default` which is then persisted so the next read finds it.
    pub fn load_or_default<T>(&self, namespace: &str, name: &str, default: T) -> T
    where
        T: Serialize + DeserializeOwned,
    {
        match self.get(namespace, name) {
            Ok(Some(value)) => return value,
            Ok(None) => debug!("No {}/{} stored, using default", namespace, name),
            Err(e) => error!("{}, using default", e),
        }
        // Already logged by save_value
        let _ = self.save_value(namespace, name, &default);
        default
    }

    /// Entry names in document order.
    pub fn names(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self.read(namespace)?.map(|doc| doc.keys().cloned().collect()).unwrap_or_default())
    }
}

fn persistence<E: std::fmt::Display>(path: &Path, e: E) -> Error {
    Error::Persistence {
        path: path.to_owned(),
        reason: e.to_string(),
    }
}
