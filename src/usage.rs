//! Per-command usage statistics and suggestion ranking.

use crate::commands::builtin::DEFAULT_SUGGESTIONS;
use crate::error::{Result, VoiceCommandError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Below this many recorded commands, suggestions use the seed list.
pub const MIN_RECORDS_FOR_RANKING: usize = 3;

const USAGE_STATE_VERSION: u32 = 1;

/// Usage statistics for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandUsageRecord {
    pub command_id: String,
    pub invocation_count: u64,
    /// Running average of successful attempts in `[0, 1]`.
    pub success_rate: f64,
    pub last_used_at: DateTime<Utc>,
}

impl CommandUsageRecord {
    fn empty(command_id: &str) -> Self {
        Self {
            command_id: command_id.to_owned(),
            invocation_count: 0,
            success_rate: 0.0,
            last_used_at: Utc::now(),
        }
    }

    /// Fold one attempt into the running average.
    pub fn record_attempt(&mut self, success: bool, at: DateTime<Utc>) {
        let count = self.invocation_count as f64;
        let hit = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * count + hit) / (count + 1.0);
        self.invocation_count += 1;
        self.last_used_at = at;
    }

    /// Ranking weight used for suggestions.
    pub fn weight(&self) -> f64 {
        self.invocation_count as f64 * self.success_rate
    }
}

/// Narrow key-value persistence for usage records.
pub trait UsageBackend: Send + Sync {
    fn get(&self, command_id: &str) -> anyhow::Result<Option<CommandUsageRecord>>;
    fn put(&self, record: &CommandUsageRecord) -> anyhow::Result<()>;
    fn all(&self) -> anyhow::Result<Vec<CommandUsageRecord>>;
}

/// Usage records kept in memory only.
#[derive(Debug, Default)]
pub struct InMemoryUsageBackend {
    records: Mutex<BTreeMap<String, CommandUsageRecord>>,
}

impl UsageBackend for InMemoryUsageBackend {
    fn get(&self, command_id: &str) -> anyhow::Result<Option<CommandUsageRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(command_id).cloned())
    }

    fn put(&self, record: &CommandUsageRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.command_id.clone(), record.clone());
        Ok(())
    }

    fn all(&self) -> anyhow::Result<Vec<CommandUsageRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.values().cloned().collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UsageState {
    #[serde(default = "default_state_version")]
    version: u32,
    #[serde(default)]
    records: BTreeMap<String, CommandUsageRecord>,
}

fn default_state_version() -> u32 {
    USAGE_STATE_VERSION
}

/// Usage records stored as one JSON document, rewritten on every `put`.
#[derive(Debug)]
pub struct JsonFileUsageBackend {
    path: PathBuf,
    records: Mutex<BTreeMap<String, CommandUsageRecord>>,
}

impl JsonFileUsageBackend {
    /// Open the store at `path`. A missing file starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = load_records(&path)?;
        tracing::debug!(path = %path.display(), count = records.len(), "loaded usage records");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_records(path: &Path) -> Result<BTreeMap<String, CommandUsageRecord>> {
    let bytes = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(VoiceCommandError::Persistence(format!(
                "cannot read usage records: {e}"
            )));
        }
    };
    let state: UsageState = serde_json::from_slice(&bytes)
        .map_err(|e| VoiceCommandError::Persistence(format!("cannot parse usage records: {e}")))?;
    Ok(state.records)
}

fn save_records(path: &Path, records: &BTreeMap<String, CommandUsageRecord>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            VoiceCommandError::Persistence(format!("cannot create usage dir: {e}"))
        })?;
    }
    let state = UsageState {
        version: USAGE_STATE_VERSION,
        records: records.clone(),
    };
    let json = serde_json::to_string_pretty(&state)
        .map_err(|e| VoiceCommandError::Persistence(format!("cannot serialize usage: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| VoiceCommandError::Persistence(format!("cannot write usage: {e}")))?;
    Ok(())
}

impl UsageBackend for JsonFileUsageBackend {
    fn get(&self, command_id: &str) -> anyhow::Result<Option<CommandUsageRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(command_id).cloned())
    }

    fn put(&self, record: &CommandUsageRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.command_id.clone(), record.clone());
        save_records(&self.path, &records)?;
        Ok(())
    }

    fn all(&self) -> anyhow::Result<Vec<CommandUsageRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.values().cloned().collect())
    }
}

/// Records dispatch outcomes and ranks commands for suggestions.
#[derive(Clone)]
pub struct UsageStore {
    backend: Arc<dyn UsageBackend>,
}

impl std::fmt::Debug for UsageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageStore").finish_non_exhaustive()
    }
}

impl Default for UsageStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl UsageStore {
    pub fn new(backend: Arc<dyn UsageBackend>) -> Self {
        Self { backend }
    }

    /// A store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryUsageBackend::default()))
    }

    /// Build the store described by the config: file-backed when a path
    /// is set, in memory otherwise.
    ///
    /// An unreadable or corrupt usage file is logged and replaced by an
    /// empty in-memory store. The file itself is left untouched.
    pub fn load_or_in_memory(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::in_memory();
        };
        match JsonFileUsageBackend::open(path) {
            Ok(backend) => Self::new(Arc::new(backend)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "usage file unusable, tracking usage in memory"
                );
                Self::in_memory()
            }
        }
    }

    /// Record one dispatch attempt and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceCommandError::Persistence`] if the backend fails.
    pub fn record(&self, command_id: &str, success: bool) -> Result<CommandUsageRecord> {
        let mut record = self
            .backend
            .get(command_id)
            .map_err(|e| VoiceCommandError::Persistence(e.to_string()))?
            .unwrap_or_else(|| CommandUsageRecord::empty(command_id));
        record.record_attempt(success, Utc::now());
        self.backend
            .put(&record)
            .map_err(|e| VoiceCommandError::Persistence(e.to_string()))?;
        Ok(record)
    }

    /// Current record for a command, if it has ever been dispatched.
    pub fn get(&self, command_id: &str) -> Result<Option<CommandUsageRecord>> {
        self.backend
            .get(command_id)
            .map_err(|e| VoiceCommandError::Persistence(e.to_string()))
    }

    /// Up to `limit` command ids, most useful first.
    ///
    /// Ranked by `invocation_count * success_rate` (recent use breaks
    /// ties). With fewer than [`MIN_RECORDS_FOR_RANKING`] recorded
    /// commands the fixed seed list is returned instead.
    pub fn suggestions(&self, limit: usize) -> Vec<String> {
        let mut records = match self.backend.all() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("cannot read usage records: {e}");
                Vec::new()
            }
        };

        if records.len() < MIN_RECORDS_FOR_RANKING {
            return DEFAULT_SUGGESTIONS
                .iter()
                .take(limit)
                .map(|id| (*id).to_owned())
                .collect();
        }

        records.sort_by(|a, b| {
            b.weight()
                .total_cmp(&a.weight())
                .then_with(|| b.last_used_at.cmp(&a.last_used_at))
                .then_with(|| a.command_id.cmp(&b.command_id))
        });
        records
            .into_iter()
            .take(limit)
            .map(|r| r.command_id)
            .collect()
    }
}
