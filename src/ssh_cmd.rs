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

//! SSH command assembler (C2). Builds the argument vector for `ssh`,
//! validating the remote endpoint before a single byte reaches a shell.

use crate::transfer::RemoteConfig;
use thiserror::Error;

const USER_HOST_METACHARACTERS: [char; 12] =
    ['&', '|', ';', '<', '>', '(', ')', '$', '`', '\\', '"', '\''];

const ALLOWED_OPTION_KEYS: [&str; 11] = [
    "AddressFamily",
    "Compression",
    "ConnectionAttempts",
    "ConnectTimeout",
    "TCPKeepAlive",
    "ServerAliveInterval",
    "ServerAliveCountMax",
    "Ciphers",
    "MACs",
    "KexAlgorithms",
    "PreferredAuthentications",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SshAssembleError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

fn contains_metachar(s: &str) -> bool {
    s.chars().any(|c| USER_HOST_METACHARACTERS.contains(&c))
}

/// Assembles the `ssh` argument vector for `remote`, applying the rules of
/// spec §4.2 in order. Never invokes `ssh`; returns `InvalidInput` on any
/// rule violation.
pub fn assemble_ssh_command(
    remote: &RemoteConfig,
    managed_known_hosts_path: &str,
) -> Result<Vec<String>, SshAssembleError> {
    let mut argv = vec!["ssh".to_string()];

    // Rule 1: non-default port.
    if remote.port != 0 && remote.port != 22 {
        argv.push("-p".to_string());
        argv.push(remote.port.to_string());
    }

    // Rule 2: private key.
    if let Some(private_key) = remote.private_key.as_deref() {
        if contains_metachar(private_key) {
            return Err(SshAssembleError::InvalidInput(format!(
                "private key path contains a shell metacharacter: {private_key}"
            )));
        }
        argv.push("-i".to_string());
        argv.push(private_key.to_string());
        argv.push("-o".to_string());
        argv.push(format!("UserKnownHostsFile={managed_known_hosts_path}"));
    }

    // Rule 3: skip host key check.
    if remote.skip_host_key_check {
        argv.push("-o".to_string());
        argv.push("StrictHostKeyChecking=no".to_string());
    }

    // Rule 4: connection hardening, always appended.
    for opt in [
        "BatchMode=yes",
        "ConnectTimeout=10",
        "ServerAliveInterval=10",
        "ServerAliveCountMax=3",
    ] {
        argv.push("-o".to_string());
        argv.push(opt.to_string());
    }

    // Rule 5: extra options, allow-listed by key.
    if let Some(options) = remote.options.as_deref() {
        for token in options.split_whitespace() {
            let rest = token.strip_prefix("-o").ok_or_else(|| {
                SshAssembleError::InvalidInput(format!(
                    "ssh option token must begin with -o: {token}"
                ))
            })?;
            let (key, value) = rest.split_once('=').ok_or_else(|| {
                SshAssembleError::InvalidInput(format!(
                    "ssh option must be of the form -oKEY=VALUE: {token}"
                ))
            })?;
            if !ALLOWED_OPTION_KEYS.contains(&key) {
                return Err(SshAssembleError::InvalidInput(format!(
                    "ssh option key not in allow list: {key}"
                )));
            }
            if contains_metachar(value) {
                return Err(SshAssembleError::InvalidInput(format!(
                    "ssh option value contains a shell metacharacter: {value}"
                )));
            }
            argv.push("-o".to_string());
            argv.push(format!("{key}={value}"));
        }
    }

    // Rule 6: user/host metacharacters.
    if contains_metachar(&remote.user) {
        return Err(SshAssembleError::InvalidInput(format!(
            "user contains a shell metacharacter: {}",
            remote.user
        )));
    }
    if contains_metachar(&remote.host) {
        return Err(SshAssembleError::InvalidInput(format!(
            "host contains a shell metacharacter: {}",
            remote.host
        )));
    }

    // Rule 7: destination.
    argv.push(format!("{}@{}", remote.user, remote.host));

    Ok(argv)
}
