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

//! SSH peering key store (C3). Outbound key pairs live one per peering id
//! under `<base>/<peering id>/id_<algorithm>[.pub]`; inbound peers are
//! authorized through the managed `authorized_keys`/`known_hosts` files.

pub mod authorized_keys;
pub mod known_hosts;

use crate::error::{ReplicatorError, Result};
use authorized_keys::AuthorizedKeyEntry;
use known_hosts::KnownHostEntry;
use log::{debug, warn};
use regex_lite::Regex;
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm as SshKeyAlgorithm, LineEnding, PrivateKey};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Ed25519,
    Rsa,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Ed25519 => "ed25519",
            Algorithm::Rsa => "rsa",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeeringKey {
    pub peering_id: String,
    pub algorithm: Algorithm,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub public_key_material: String,
}

pub struct PeerInfo {
    pub peering_id: String,
    pub public_key: String,
    pub hostname: Option<String>,
    pub ssh_options: Vec<String>,
}

fn peering_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("pattern is valid"))
}

fn validate_peering_id(peering_id: &str) -> Result<()> {
    if peering_id.is_empty() || !peering_id_re().is_match(peering_id) {
        return Err(ReplicatorError::SshKeyPairInvalidPeeringId(
            peering_id.to_string(),
        ));
    }
    Ok(())
}

const PUBLIC_KEY_PREFIXES: [&str; 4] = ["ssh-ed25519", "ssh-rsa", "ecdsa-sha2-nistp", "ssh-dss"];

fn validate_public_key(public_key: &str) -> Result<()> {
    if PUBLIC_KEY_PREFIXES.iter().any(|p| public_key.starts_with(p)) {
        Ok(())
    } else {
        Err(ReplicatorError::SshKeyPairInvalidPublicKey(
            public_key.to_string(),
        ))
    }
}

pub struct KeyStore {
    base_dir: PathBuf,
    authorized_keys_path: PathBuf,
    known_hosts_path: PathBuf,
}

impl KeyStore {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        authorized_keys_path: impl Into<PathBuf>,
        known_hosts_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            authorized_keys_path: authorized_keys_path.into(),
            known_hosts_path: known_hosts_path.into(),
        }
    }

    fn peer_dir(&self, peering_id: &str) -> PathBuf {
        self.base_dir.join(peering_id)
    }

    fn key_paths(&self, peering_id: &str, algorithm: Algorithm) -> (PathBuf, PathBuf) {
        let dir = self.peer_dir(peering_id);
        let private = dir.join(format!("id_{}", algorithm.as_str()));
        let public = dir.join(format!("id_{}.pub", algorithm.as_str()));
        (private, public)
    }

    /// Generates a fresh key pair for `peering_id`. ed25519 keys are
    /// generated in-process and serialized in OpenSSH format; RSA keys
    /// shell out to `ssh-keygen` because an in-process OpenSSH-format RSA
    /// generator is an external dependency this crate does not carry.
    pub fn generate(&self, peering_id: &str, algorithm: Algorithm) -> Result<PeeringKey> {
        validate_peering_id(peering_id)?;
        let dir = self.peer_dir(peering_id);
        fs::create_dir_all(&dir)?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        let (private_path, public_path) = self.key_paths(peering_id, algorithm);

        let public_key_material = match algorithm {
            Algorithm::Ed25519 => {
                debug!("generating ed25519 key pair for peering id {peering_id} in-process");
                let private_key = PrivateKey::random(&mut OsRng, SshKeyAlgorithm::Ed25519)
                    .map_err(|e| ReplicatorError::Io(std::io::Error::other(e.to_string())))?;
                let private_pem = private_key
                    .to_openssh(LineEnding::LF)
                    .map_err(|e| ReplicatorError::Io(std::io::Error::other(e.to_string())))?;
                fs::write(&private_path, private_pem.as_bytes())?;
                let public_line = private_key
                    .public_key()
                    .to_openssh()
                    .map_err(|e| ReplicatorError::Io(std::io::Error::other(e.to_string())))?;
                fs::write(&public_path, format!("{public_line} {peering_id}\n"))?;
                public_line
            }
            Algorithm::Rsa => {
                debug!("generating rsa key pair for peering id {peering_id} via ssh-keygen");
                let status = Command::new("ssh-keygen")
                    .args([
                        "-t",
                        "rsa",
                        "-b",
                        "4096",
                        "-N",
                        "",
                        "-C",
                        peering_id,
                        "-f",
                    ])
                    .arg(&private_path)
                    .status()?;
                if !status.success() {
                    return Err(ReplicatorError::Io(std::io::Error::other(
                        "ssh-keygen failed to generate rsa key pair",
                    )));
                }
                fs::read_to_string(&public_path)?.trim().to_string()
            }
        };

        fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600))?;
        fs::set_permissions(&public_path, fs::Permissions::from_mode(0o600))?;

        Ok(PeeringKey {
            peering_id: peering_id.to_string(),
            algorithm,
            private_key_path: private_path,
            public_key_path: public_path,
            public_key_material,
        })
    }

    pub fn get(&self, peering_id: &str) -> Result<PeeringKey> {
        validate_peering_id(peering_id)?;
        for algorithm in [Algorithm::Ed25519, Algorithm::Rsa] {
            let (private_path, public_path) = self.key_paths(peering_id, algorithm);
            if private_path.is_file() && public_path.is_file() {
                let public_key_material = fs::read_to_string(&public_path)?.trim().to_string();
                return Ok(PeeringKey {
                    peering_id: peering_id.to_string(),
                    algorithm,
                    private_key_path: private_path,
                    public_key_path: public_path,
                    public_key_material,
                });
            }
        }
        Err(ReplicatorError::SshKeyPairNotFound(peering_id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<PeeringKey>> {
        let mut result = Vec::new();
        let Ok(entries) = fs::read_dir(&self.base_dir) else {
            return Ok(result);
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(peering_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match self.get(&peering_id) {
                Ok(key) => result.push(key),
                Err(ReplicatorError::SshKeyPairNotFound(_)) => {
                    debug!("skipping incomplete peer directory {peering_id}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }

    pub fn remove(&self, peering_id: &str) -> Result<()> {
        validate_peering_id(peering_id)?;
        let dir = self.peer_dir(peering_id);
        if !dir.exists() {
            return Err(ReplicatorError::SshKeyPairNotFound(peering_id.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    pub fn authorize_peer(&self, peer: &PeerInfo) -> Result<()> {
        validate_peering_id(&peer.peering_id)?;
        validate_public_key(&peer.public_key)?;
        let mut entries = authorized_keys::read_entries(&self.authorized_keys_path)?;
        if entries.iter().any(|e| e.comment == peer.peering_id) {
            return Err(ReplicatorError::SshKeyPairAlreadyExists(
                peer.peering_id.clone(),
            ));
        }
        let (key_type, key_body) = peer
            .public_key
            .split_once(' ')
            .map(|(t, rest)| (t.to_string(), rest.split_whitespace().next().unwrap_or("").to_string()))
            .unwrap_or((peer.public_key.clone(), String::new()));
        entries.push(AuthorizedKeyEntry::new(
            key_type,
            key_body,
            peer.peering_id.clone(),
            peer.ssh_options.clone(),
        ));
        authorized_keys::write_entries(&self.authorized_keys_path, &entries)?;

        if let Some(hostname) = peer.hostname.as_ref() {
            // best effort host key bookkeeping, caller supplies the key via
            // add_remote_host_key once known; nothing to append here beyond
            // the authorized_keys entry itself.
            debug!("peer {} authorized with hostname hint {hostname}", peer.peering_id);
        }
        Ok(())
    }

    pub fn deauthorize_peer(&self, peering_id: &str) -> Result<()> {
        validate_peering_id(peering_id)?;
        let mut entries = authorized_keys::read_entries(&self.authorized_keys_path)?;
        let before = entries.len();
        entries.retain(|e| e.comment != peering_id);
        if entries.len() == before {
            return Err(ReplicatorError::SshKeyPairNotFound(peering_id.to_string()));
        }
        authorized_keys::write_entries(&self.authorized_keys_path, &entries)?;

        if let Err(e) = self.remove_known_host(peering_id, None) {
            warn!("best-effort known_hosts cleanup for {peering_id} failed: {e}");
        }
        Ok(())
    }

    pub fn add_remote_host_key(
        &self,
        hostname: &str,
        host_key: &str,
        peering_id: &str,
    ) -> Result<()> {
        validate_peering_id(peering_id)?;
        let mut entries = known_hosts::read_entries(&self.known_hosts_path)?;
        entries.retain(|e| !(e.hostname == hostname && e.peering_id == peering_id));
        entries.push(KnownHostEntry::new(
            hostname.to_string(),
            host_key.to_string(),
            peering_id.to_string(),
        ));
        known_hosts::write_entries(&self.known_hosts_path, &entries)
            .map_err(ReplicatorError::from)
    }

    pub fn remove_known_host(&self, peering_id: &str, hostname: Option<&str>) -> Result<()> {
        let mut entries = known_hosts::read_entries(&self.known_hosts_path)?;
        let before = entries.len();
        entries.retain(|e| {
            e.peering_id != peering_id || hostname.is_some_and(|h| h != e.hostname)
        });
        if entries.len() == before {
            return Err(ReplicatorError::SshKeyPairNotFound(peering_id.to_string()));
        }
        known_hosts::write_entries(&self.known_hosts_path, &entries)
            .map_err(ReplicatorError::from)
    }

    pub fn authorized_keys_path(&self) -> &Path {
        &self.authorized_keys_path
    }

    pub fn known_hosts_path(&self) -> &Path {
        &self.known_hosts_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_store() -> (KeyStore, PathBuf) {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("zreplicate-keystore-test-{n}"));
        let keys_dir = dir.join("keys");
        let store = KeyStore::new(
            keys_dir,
            dir.join("authorized_keys"),
            dir.join("known_hosts"),
        );
        (store, dir)
    }

    #[test]
    fn rejects_invalid_peering_ids() {
        let (store, _dir) = temp_store();
        assert!(matches!(
            store.generate("", Algorithm::Ed25519),
            Err(ReplicatorError::SshKeyPairInvalidPeeringId(_))
        ));
        assert!(matches!(
            store.generate("has space", Algorithm::Ed25519),
            Err(ReplicatorError::SshKeyPairInvalidPeeringId(_))
        ));
        assert!(matches!(
            store.generate("has/slash", Algorithm::Ed25519),
            Err(ReplicatorError::SshKeyPairInvalidPeeringId(_))
        ));
    }

    #[test]
    fn generate_then_remove_leaves_no_files() {
        let (store, dir) = temp_store();
        let key = store.generate("peer-a", Algorithm::Ed25519).unwrap();
        assert!(key.private_key_path.is_file());
        assert!(key.public_key_path.is_file());
        store.remove("peer-a").unwrap();
        assert!(!store.peer_dir("peer-a").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn authorize_then_deauthorize_round_trips() {
        let (store, dir) = temp_store();
        let peer = PeerInfo {
            peering_id: "peer-b".to_string(),
            public_key: "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5".to_string(),
            hostname: None,
            ssh_options: Vec::new(),
        };
        store.authorize_peer(&peer).unwrap();
        assert!(matches!(
            store.authorize_peer(&peer),
            Err(ReplicatorError::SshKeyPairAlreadyExists(_))
        ));
        store.deauthorize_peer("peer-b").unwrap();
        let entries = authorized_keys::read_entries(store.authorized_keys_path()).unwrap();
        assert!(entries.is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rejects_public_key_without_type_prefix() {
        let (store, dir) = temp_store();
        let peer = PeerInfo {
            peering_id: "peer-c".to_string(),
            public_key: "not-a-key AAAA".to_string(),
            hostname: None,
            ssh_options: Vec::new(),
        };
        assert!(matches!(
            store.authorize_peer(&peer),
            Err(ReplicatorError::SshKeyPairInvalidPublicKey(_))
        ));
        let _ = fs::remove_dir_all(dir);
    }
}
