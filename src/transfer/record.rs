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

//! TransferRecord and its value types (spec §3). The record is the
//! authoritative object the state machine owns; everything here is plain
//! data, serialized verbatim to the `.yaml` sidecar by the store (C4).

use super::config::TransferConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Starting,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Skipped,
    Unknown,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed
                | TransferStatus::Failed
                | TransferStatus::Cancelled
                | TransferStatus::Skipped
                | TransferStatus::Unknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Starting => "starting",
            TransferStatus::Running => "running",
            TransferStatus::Paused => "paused",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Skipped => "skipped",
            TransferStatus::Unknown => "unknown",
        }
    }
}

/// In-memory-only pending intent; never persisted (spec §3 invariants,
/// §9 "Pending-action field"). Keep this out of `TransferRecord`'s
/// serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferAction {
    #[default]
    None,
    Pause,
    Stop,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FullSend,
    InitialSend,
    IncrementalSend,
}

impl Phase {
    pub fn description(self) -> &'static str {
        match self {
            Phase::FullSend => "full send",
            Phase::InitialSend => "initial send (bootstrapping target)",
            Phase::IncrementalSend => "incremental send",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub rate_bytes_per_sec: Option<u64>,
    pub elapsed_seconds: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub eta_seconds: Option<u64>,
    pub phase: Option<Phase>,
    pub phase_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Full,
    Incremental,
    Intermediary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSizeInfo {
    pub calculated_transfer_size: u64,
    pub actual_transfer_type: TransferType,
}

/// The four sidecar paths every transfer owns (spec §4.4/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecars {
    pub config_file: PathBuf,
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    pub progress_file: PathBuf,
}

impl Sidecars {
    pub fn new(dir: &Path, id: Uuid) -> Self {
        Self {
            config_file: dir.join(format!("{id}.yaml")),
            log_file: dir.join(format!("{id}.log")),
            pid_file: dir.join(format!("{id}.pid")),
            progress_file: dir.join(format!("{id}.progress")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub policy_id: Option<String>,
    pub status: TransferStatus,
    #[serde(skip)]
    pub pending_action: TransferAction,
    pub config: TransferConfig,
    pub progress: TransferProgress,
    pub size_info: Option<TransferSizeInfo>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_paused_at: Option<DateTime<Utc>>,
    pub pid: i32,
    pub sidecars: Sidecars,
    pub error: Option<String>,
    /// Additive field (SPEC_FULL §3): human-readable retry suggestion for
    /// the "partially-complete state"/"kernel modules must be upgraded"
    /// revert-to-paused case (spec §4.7.2 step 8). Does not replace
    /// `error`, which keeps the raw captured log tail.
    pub retry_hint: Option<String>,
}

impl TransferRecord {
    pub fn new(id: Uuid, config: TransferConfig, policy_id: Option<String>, dir: &Path) -> Self {
        Self {
            id,
            policy_id,
            status: TransferStatus::Starting,
            pending_action: TransferAction::None,
            config,
            progress: TransferProgress::default(),
            size_info: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_paused_at: None,
            pid: 0,
            sidecars: Sidecars::new(dir, id),
            error: None,
            retry_hint: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, TransferStatus::Running | TransferStatus::Paused)
            || self.status == TransferStatus::Starting
    }

    /// Marks a terminal status, setting `completed_at` per the spec §3
    /// invariant ("once a terminal status is set, completed_at is
    /// non-null").
    pub fn set_terminal(&mut self, status: TransferStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
        if error.is_some() {
            self.error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::config::TransferConfig;
    use std::path::Path;

    #[test]
    fn new_record_starts_in_starting_with_no_pid() {
        let id = Uuid::now_v7();
        let record = TransferRecord::new(id, TransferConfig::default(), None, Path::new("/tmp/transfers"));
        assert_eq!(record.status, TransferStatus::Starting);
        assert_eq!(record.pid, 0);
        assert!(record.completed_at.is_none());
        assert!(record.is_active());
    }

    #[test]
    fn set_terminal_sets_completed_at_and_preserves_error_when_none_given() {
        let id = Uuid::now_v7();
        let mut record = TransferRecord::new(id, TransferConfig::default(), None, Path::new("/tmp/transfers"));
        record.error = Some("earlier warning".to_string());
        record.set_terminal(TransferStatus::Completed, None);
        assert!(record.completed_at.is_some());
        // `set_terminal(_, None)` must not erase a pre-existing error --
        // only an explicit `Some(..)` overwrites it.
        assert_eq!(record.error.as_deref(), Some("earlier warning"));
        assert!(!record.is_active());
    }

    #[test]
    fn is_terminal_matches_spec_terminal_set() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(TransferStatus::Skipped.is_terminal());
        assert!(TransferStatus::Unknown.is_terminal());
        assert!(!TransferStatus::Starting.is_terminal());
        assert!(!TransferStatus::Running.is_terminal());
        assert!(!TransferStatus::Paused.is_terminal());
    }

    #[test]
    fn sidecar_paths_are_keyed_by_id() {
        let id = Uuid::now_v7();
        let sidecars = Sidecars::new(Path::new("/var/lib/zreplicate/transfers"), id);
        assert_eq!(sidecars.config_file, Path::new(&format!("/var/lib/zreplicate/transfers/{id}.yaml")));
        assert_eq!(sidecars.log_file, Path::new(&format!("/var/lib/zreplicate/transfers/{id}.log")));
        assert_eq!(sidecars.pid_file, Path::new(&format!("/var/lib/zreplicate/transfers/{id}.pid")));
        assert_eq!(sidecars.progress_file, Path::new(&format!("/var/lib/zreplicate/transfers/{id}.progress")));
    }
}
