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

//! Parsing and serializing the managed `known_hosts` file (spec §3/§4.3).
//! A managed line's first field is the hostname, its last field the
//! peering id, everything between is the host key.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    pub hostname: String,
    pub host_key: String,
    pub peering_id: String,
}

impl KnownHostEntry {
    pub fn new(hostname: String, host_key: String, peering_id: String) -> Self {
        Self {
            hostname,
            host_key,
            peering_id,
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return None;
        }
        let hostname = tokens[0].to_string();
        let peering_id = tokens[tokens.len() - 1].to_string();
        let host_key = tokens[1..tokens.len() - 1].join(" ");
        Some(Self {
            hostname,
            host_key,
            peering_id,
        })
    }

    pub fn format(&self) -> String {
        format!("{} {} {}", self.hostname, self.host_key, self.peering_id)
    }
}

pub fn read_entries(path: &Path) -> io::Result<Vec<KnownHostEntry>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.lines().filter_map(KnownHostEntry::parse).collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub fn write_entries(path: &Path, entries: &[KnownHostEntry]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
    }
    let mut contents = String::new();
    for entry in entries {
        contents.push_str(&entry.format());
        contents.push('\n');
    }
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true).mode(0o600);
    use std::io::Write;
    let mut file = opts.open(path)?;
    file.write_all(contents.as_bytes())?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hostname_key_and_peering_id() {
        let entry =
            KnownHostEntry::parse("backup.example.com ssh-ed25519 AAAAC3 peer-a").unwrap();
        assert_eq!(entry.hostname, "backup.example.com");
        assert_eq!(entry.host_key, "ssh-ed25519 AAAAC3");
        assert_eq!(entry.peering_id, "peer-a");
    }

    #[test]
    fn parse_then_format_is_a_fixed_point() {
        let line = "10.0.0.5 ssh-rsa AAAAB3NzaC1yc2E= peer-b";
        let entry = KnownHostEntry::parse(line).unwrap();
        assert_eq!(entry.format(), line);
    }

    #[test]
    fn rejects_short_lines() {
        assert!(KnownHostEntry::parse("hostonly").is_none());
        assert!(KnownHostEntry::parse("# comment line").is_none());
    }
}
