//  ZFS Replication Supervisor
//  Copyright (C) 2025  Ifaz Kabir

//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.

//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.

//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Transfer Store (C4): the on-disk projection of transfer records and the
//! crash-recovery reconciliation run on startup (spec §4.4).

use super::record::{TransferRecord, TransferStatus};
use crate::error::Result;
use crate::sys;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct TransferStore {
    dir: PathBuf,
}

impl TransferStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serializes `record` to its `.yaml` sidecar as a full-file replacement.
    pub fn persist(&self, record: &TransferRecord) -> Result<()> {
        let yaml = serde_yaml::to_string(record)?;
        let tmp = record.sidecars.config_file.with_extension("yaml.tmp");
        fs::write(&tmp, yaml)?;
        fs::rename(&tmp, &record.sidecars.config_file)?;
        Ok(())
    }

    /// Globs `*.yaml` without deserializing; used by [`load_all`] and by
    /// [`prune_historical`] (SPEC_FULL §4 supplement to C4).
    pub fn list_ids(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Ok(ids);
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn load(&self, id: Uuid) -> Result<TransferRecord> {
        let path = self.dir.join(format!("{id}.yaml"));
        let contents = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn delete_sidecars(&self, record: &TransferRecord) -> Result<()> {
        for path in [
            &record.sidecars.config_file,
            &record.sidecars.log_file,
            &record.sidecars.pid_file,
            &record.sidecars.progress_file,
        ] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn delete_pid_file(&self, record: &TransferRecord) -> Result<()> {
        match fs::remove_file(&record.sidecars.pid_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Startup reconciliation (spec §4.4). Loads every persisted record;
    /// for `running`/`paused` records whose process is no longer alive it
    /// corrects the status and re-persists. Returns all records, active and
    /// historical.
    pub fn load_all(&self) -> Result<Vec<TransferRecord>> {
        let mut out = Vec::new();
        for id in self.list_ids()? {
            let mut record = match self.load(id) {
                Ok(r) => r,
                Err(e) => {
                    warn!("skipping unreadable transfer record {id}: {e}");
                    continue;
                }
            };
            let original_status = record.status;
            if matches!(
                record.status,
                TransferStatus::Running | TransferStatus::Paused
            ) {
                let alive = record.pid > 0 && sys::group_alive(record.pid);
                if alive {
                    record.status = TransferStatus::Running;
                } else if record.config.receive.resumable {
                    record.status = TransferStatus::Paused;
                    record.error = None;
                    record.pid = 0;
                } else {
                    record.set_terminal(
                        TransferStatus::Unknown,
                        Some("process no longer running (status uncertain)".to_string()),
                    );
                }
                if record.status != original_status {
                    info!(
                        "reconciled transfer {id}: persisted status {:?} -> {:?}",
                        original_status, record.status
                    );
                    self.persist(&record)?;
                }
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Deletes sidecars for terminal records older than `older_than`
    /// (SPEC_FULL §4 supplement). Not scheduled automatically; callers
    /// decide when retention policy runs.
    pub fn prune_historical(&self, older_than: chrono::Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now() - older_than;
        let mut pruned = 0;
        for id in self.list_ids()? {
            let record = match self.load(id) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if record.status.is_terminal()
                && record.completed_at.is_some_and(|t| t < cutoff)
            {
                self.delete_sidecars(&record)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}
