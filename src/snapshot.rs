//! Counter store snapshots
//!
//! A snapshot lets several runs of the observed program accumulate into one
//! report: save the store at the end of a run, load and merge it into the
//! next. Files are JSON and written through a temporary file plus rename.
//!
//! Identity tokens mean nothing outside the run that issued them, so the
//! saved store is [portable](CounterStore::portable): constructors and
//! prototypes are recorded by name.

use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{io_error, AnalysisError, AnalysisResult};
use crate::store::CounterStore;
use crate::value::HostResolver;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// RFC 3339 timestamp of the save
    pub saved_at: String,
    pub store: CounterStore,
}

impl Snapshot {
    /// Capture `store`, naming its identities through `resolver`
    pub fn new(store: &CounterStore, resolver: &dyn HostResolver) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now().to_rfc3339(),
            store: store.portable(resolver),
        }
    }

    pub fn to_json(&self) -> AnalysisResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> AnalysisResult<Self> {
        let snapshot: Snapshot = serde_json::from_str(text)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AnalysisError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }
        Ok(snapshot)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> AnalysisResult<()> {
        let path = path.as_ref();
        let temp = path.with_extension("tmp");
        fs::write(&temp, self.to_json()?).map_err(|e| io_error(&temp, e))?;
        fs::rename(&temp, path).map_err(|e| io_error(path, e))?;
        log::info!("Saved analysis snapshot to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> AnalysisResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        let snapshot = Self::from_json(&text)?;
        log::info!(
            "Loaded analysis snapshot from {} (saved {})",
            path.display(),
            snapshot.saved_at
        );
        Ok(snapshot)
    }
}
