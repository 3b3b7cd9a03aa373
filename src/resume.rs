//! Resume-position store
//!
//! Positions are only kept for on-demand content. Writes are throttled to
//! one per save interval, plus one on pause and one at session end.

use crate::config::PlayerConfig;
use crate::error::StorageError;
use crate::models::{ContentIdentity, ContentKind};
use crate::provider::PositionStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Storage key: one record per profile and content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeKey {
    pub profile_id: String,
    pub content_type: ContentKind,
    pub content_id: String,
}

impl ResumeKey {
    pub fn new(profile_id: &str, identity: &ContentIdentity) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            content_type: identity.kind,
            content_id: identity.id.clone(),
        }
    }

    /// Flat key used in the JSON file
    fn file_key(&self) -> String {
        format!("{}:{}:{}", self.profile_id, self.content_type, self.content_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub profile_id: String,
    pub identity: ContentIdentity,
    pub position_seconds: f64,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeRecord {
    pub fn key(&self) -> ResumeKey {
        ResumeKey::new(&self.profile_id, &self.identity)
    }
}

struct ActiveSession {
    identity: ContentIdentity,
    /// Position captured when the prompt was offered
    offered: Option<f64>,
    pending_seek: Option<f64>,
    position: f64,
    duration: Option<f64>,
    last_saved: Option<Instant>,
    persisted_position: Option<f64>,
}

impl ActiveSession {
    /// Writes would clobber the stored position before the user answers
    fn writes_blocked(&self) -> bool {
        self.offered.is_some() || self.pending_seek.is_some()
    }
}

pub struct ResumeTracker {
    profile_id: String,
    storage: Box<dyn PositionStorage>,
    threshold: f64,
    save_interval: Duration,
    active: Option<ActiveSession>,
}

impl ResumeTracker {
    pub fn new(
        profile_id: &str,
        storage: Box<dyn PositionStorage>,
        threshold_secs: u64,
        save_interval: Duration,
    ) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            storage,
            threshold: threshold_secs as f64,
            save_interval,
            active: None,
        }
    }

    /// Stored position worth resuming from, or 0
    pub fn get_resume_position(&self, identity: &ContentIdentity) -> f64 {
        if identity.kind.is_live() {
            return 0.0;
        }
        let key = ResumeKey::new(&self.profile_id, identity);
        match self.storage.load(&key) {
            Ok(Some(record)) if record.position_seconds > self.threshold => {
                record.position_seconds
            }
            Ok(_) => 0.0,
            Err(e) => {
                warn!(identity = %identity, error = %e, "[RESUME] Failed to read position");
                0.0
            }
        }
    }

    /// Start tracking a new identity; returns the position to offer, if any
    pub fn begin(&mut self, identity: &ContentIdentity) -> Option<f64> {
        self.end_session();
        if identity.kind.is_live() {
            return None;
        }

        let position = self.get_resume_position(identity);
        let offered = (position > 0.0).then_some(position);
        if let Some(pos) = offered {
            debug!(identity = %identity, position = pos, "[RESUME] Offering resume");
        }
        self.active = Some(ActiveSession {
            identity: identity.clone(),
            offered,
            pending_seek: None,
            position: 0.0,
            duration: None,
            last_saved: None,
            persisted_position: None,
        });
        offered
    }

    pub fn prompt_position(&self) -> Option<f64> {
        self.active.as_ref().and_then(|a| a.offered)
    }

    /// Accept the prompt; the seek is applied on the next metadata event
    pub fn confirm_resume(&mut self) -> Option<f64> {
        let active = self.active.as_mut()?;
        let position = active.offered.take()?;
        active.pending_seek = Some(position);
        Some(position)
    }

    /// Decline the prompt and play from zero
    pub fn restart(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.offered = None;
            active.pending_seek = None;
            active.position = 0.0;
        }
    }

    pub fn take_pending_seek(&mut self) -> Option<f64> {
        let active = self.active.as_mut()?;
        let seek = active.pending_seek.take()?;
        active.position = seek;
        Some(seek)
    }

    /// Feed a time update; persists at most once per save interval
    ///
    /// Returns true when a record was written.
    pub fn update_playback_position(
        &mut self,
        current: f64,
        duration: Option<f64>,
        now: Instant,
    ) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.writes_blocked() {
            return false;
        }
        active.position = current.max(0.0);
        if duration.is_some() {
            active.duration = duration;
        }

        let due = match active.last_saved {
            Some(last) => now.saturating_duration_since(last) >= self.save_interval,
            None => true,
        };
        if due {
            self.persist(now)
        } else {
            false
        }
    }

    /// Write the latest position now, if it changed
    pub fn flush(&mut self, now: Instant) -> bool {
        let dirty = match &self.active {
            Some(a) => !a.writes_blocked() && a.persisted_position != Some(a.position),
            None => false,
        };
        dirty && self.persist(now)
    }

    /// Playback reached the end; nothing left to resume
    pub fn mark_finished(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let key = ResumeKey::new(&self.profile_id, &active.identity);
        if let Err(e) = self.storage.remove(&key) {
            warn!(identity = %active.identity, error = %e, "[RESUME] Failed to clear position");
        }
        debug!(identity = %active.identity, "[RESUME] Finished, record cleared");
        self.active = None;
    }

    /// Flush and stop tracking
    pub fn end_session(&mut self) {
        self.flush(Instant::now());
        self.active = None;
    }

    pub fn active_identity(&self) -> Option<&ContentIdentity> {
        self.active.as_ref().map(|a| &a.identity)
    }

    fn persist(&mut self, now: Instant) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let record = ResumeRecord {
            profile_id: self.profile_id.clone(),
            identity: active.identity.clone(),
            position_seconds: active.position,
            duration_seconds: active.duration,
            updated_at: Utc::now(),
        };
        active.last_saved = Some(now);
        match self.storage.save(&record) {
            Ok(()) => {
                active.persisted_position = Some(active.position);
                debug!(identity = %record.identity, position = record.position_seconds, "[RESUME] Saved");
                true
            }
            Err(e) => {
                warn!(identity = %record.identity, error = %e, "[RESUME] Failed to save position");
                false
            }
        }
    }
}

impl Drop for ResumeTracker {
    fn drop(&mut self) {
        self.end_session();
    }
}

/// Positions kept in a JSON file next to the player config
pub struct JsonFileStorage {
    path: PathBuf,
    records: HashMap<String, ResumeRecord>,
}

impl JsonFileStorage {
    pub fn default_path() -> PathBuf {
        PlayerConfig::config_dir_file("resume_positions.json")
    }

    /// Open (or start) the file at `path`
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let records = if path.exists() {
            let content = fs::read_to_string(path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    fn write(&self) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl PositionStorage for JsonFileStorage {
    fn load(&self, key: &ResumeKey) -> Result<Option<ResumeRecord>, StorageError> {
        Ok(self.records.get(&key.file_key()).cloned())
    }

    fn save(&mut self, record: &ResumeRecord) -> Result<(), StorageError> {
        self.records.insert(record.key().file_key(), record.clone());
        self.write()
    }

    fn remove(&mut self, key: &ResumeKey) -> Result<(), StorageError> {
        if self.records.remove(&key.file_key()).is_some() {
            self.write()?;
        }
        Ok(())
    }
}

/// In-memory positions; clones share the same map
#[derive(Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<HashMap<ResumeKey, ResumeRecord>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ResumeKey, ResumeRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

impl PositionStorage for MemoryStorage {
    fn load(&self, key: &ResumeKey) -> Result<Option<ResumeRecord>, StorageError> {
        Ok(self.records().get(key).cloned())
    }

    fn save(&mut self, record: &ResumeRecord) -> Result<(), StorageError> {
        self.records().insert(record.key(), record.clone());
        Ok(())
    }

    fn remove(&mut self, key: &ResumeKey) -> Result<(), StorageError> {
        self.records().remove(key);
        Ok(())
    }
}
