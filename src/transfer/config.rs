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

//! The immutable input to a transfer (spec §3: TransferConfig and its
//! nested SendConfig/ReceiveConfig/RemoteConfig/LogConfig), plus the
//! snapshot/dataset/property validation patterns from spec §4.7.1.

use crate::error::{ReplicatorError, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

fn snapshot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*(/[A-Za-z0-9][A-Za-z0-9_.:-]*)*@[A-Za-z0-9][A-Za-z0-9_.:-]*$")
            .expect("pattern is valid")
    })
}

fn dataset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*(/[A-Za-z0-9][A-Za-z0-9_.:-]*)*$")
            .expect("pattern is valid")
    })
}

fn property_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:/@+-]*$").expect("pattern is valid")
    })
}

pub(crate) fn validate_snapshot(name: &str) -> Result<()> {
    if snapshot_re().is_match(name) {
        Ok(())
    } else {
        Err(ReplicatorError::CommandInvalidInput(format!(
            "not a valid snapshot name: {name}"
        )))
    }
}

pub(crate) fn validate_dataset(name: &str) -> Result<()> {
    if dataset_re().is_match(name) {
        Ok(())
    } else {
        Err(ReplicatorError::CommandInvalidInput(format!(
            "not a valid dataset name: {name}"
        )))
    }
}

pub(crate) fn validate_property(name: &str) -> Result<()> {
    if property_re().is_match(name) {
        Ok(())
    } else {
        Err(ReplicatorError::CommandInvalidInput(format!(
            "not a valid property name or value: {name}"
        )))
    }
}

/// `zfs send` flags that affect the content or shape of the stream, the
/// subset Size Estimator (C5) cares about and the executor (C7) assembles
/// into the real pipeline (spec §4.2/§4.5/§4.7.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendConfig {
    pub snapshot: String,
    pub from_snapshot: Option<String>,
    pub replicate: bool,
    pub skip_missing: bool,
    pub properties: bool,
    pub raw: bool,
    pub large_blocks: bool,
    pub embed_data: bool,
    pub holds: bool,
    pub backup_stream: bool,
    pub intermediary: bool,
    pub compressed: bool,
    pub dry_run: bool,
    pub verbose: bool,
    pub parsable: bool,
    pub resume_token: Option<String>,
    pub log_level: Option<String>,
}

impl SendConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_snapshot(&self.snapshot)?;
        if let Some(from) = &self.from_snapshot {
            validate_snapshot(from)?;
        }
        Ok(())
    }

    /// Clears incremental-specific fields, turning this config into the
    /// full-send variant the initial-send recovery (C6) synthesizes.
    pub(crate) fn as_full_send(&self) -> Self {
        let mut full = self.clone();
        full.from_snapshot = None;
        full.intermediary = false;
        full.resume_token = None;
        full
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiveConfig {
    pub target: String,
    pub force: bool,
    pub unmounted: bool,
    pub resumable: bool,
    pub use_parent: bool,
    pub dry_run: bool,
    pub verbose: bool,
    pub properties: HashMap<String, String>,
    pub origin: Option<String>,
    pub excluded_properties: Vec<String>,
    pub remote: Option<RemoteConfig>,
}

impl ReceiveConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_dataset(&self.target)?;
        for (k, v) in &self.properties {
            validate_property(k)?;
            validate_property(v)?;
        }
        for p in &self.excluded_properties {
            validate_property(p)?;
        }
        if let Some(origin) = &self.origin {
            validate_snapshot(origin)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub user: String,
    pub private_key: Option<String>,
    pub options: Option<String>,
    #[serde(default)]
    pub skip_host_key_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub max_size_bytes: u64,
    pub truncate_on_finish: bool,
    pub retain_on_failure: bool,
    pub header_lines: usize,
    pub footer_lines: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024,
            truncate_on_finish: true,
            retain_on_failure: true,
            header_lines: 100,
            footer_lines: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferConfig {
    pub send: SendConfig,
    pub receive: ReceiveConfig,
    pub log: Option<LogConfig>,
}

impl TransferConfig {
    /// Runs the send/receive field regexes of spec §4.7.1, and the SSH
    /// assembler's validation (§4.2) when a RemoteConfig is present.
    pub(crate) fn validate(&self, managed_known_hosts_path: &str) -> Result<()> {
        self.send.validate()?;
        self.receive.validate()?;
        if let Some(remote) = &self.receive.remote {
            crate::ssh_cmd::assemble_ssh_command(remote, managed_known_hosts_path)?;
        }
        Ok(())
    }

    pub(crate) fn is_incremental(&self) -> bool {
        self.send.from_snapshot.is_some() && self.send.resume_token.is_none()
    }
}
