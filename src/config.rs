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

//! Supervisor-wide configuration (SPEC_FULL §2 ambient "Configuration"):
//! paths for the transfers directory, the peering key directory, the
//! managed `authorized_keys`/`known_hosts` files, and the shutdown
//! deadline. Full policy/config-language parsing is an external
//! collaborator; this is just the handful of knobs the supervisor itself
//! needs, optionally loaded from a `toml` file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/root"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `<id>.yaml`/`.log`/`.pid`/`.progress` sidecars.
    pub transfers_dir: PathBuf,
    /// Base directory for per-peering-id key pairs (C3).
    pub peering_keys_dir: PathBuf,
    /// The managed `authorized_keys` file this supervisor owns entries in.
    pub managed_authorized_keys_path: PathBuf,
    /// The managed `known_hosts` file this supervisor owns entries in.
    pub managed_known_hosts_path: PathBuf,
    /// Deadline the Shutdown Coordinator (C9) gives active transfers to
    /// exit cleanly after `SIGTERM` before escalating to `SIGKILL`.
    pub shutdown_deadline_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let home = home_dir();
        Self {
            transfers_dir: PathBuf::from("/var/lib/zreplicate/transfers"),
            peering_keys_dir: PathBuf::from("/var/lib/zreplicate/peering-keys"),
            managed_authorized_keys_path: home.join(".ssh/authorized_keys"),
            managed_known_hosts_path: PathBuf::from("/var/lib/zreplicate/peering-keys/known_hosts"),
            shutdown_deadline_secs: 30,
        }
    }
}

impl Config {
    /// Loads a `Config` from a `toml` file, falling back to [`Default`] for
    /// any field the file omits.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| crate::error::ReplicatorError::CommandInvalidInput(format!("invalid config file: {e}")))
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_match_disk_layout() {
        let config = Config::default();
        assert!(config.managed_known_hosts_path.ends_with("known_hosts"));
        assert!(config.managed_authorized_keys_path.ends_with(".ssh/authorized_keys"));
    }

    #[test]
    fn loads_partial_toml_with_defaults() {
        let dir = std::env::temp_dir().join(format!("zreplicate-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "shutdown_deadline_secs = 60\n").unwrap();
        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.shutdown_deadline_secs, 60);
        assert_eq!(config.transfers_dir, Config::default().transfers_dir);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
