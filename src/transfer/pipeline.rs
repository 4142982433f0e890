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

//! Pipeline assembly: turns a [`TransferConfig`] into the single shell
//! string the executor (C7) spawns (spec §4.7.2 step 4, §6). Flag
//! selection follows the teacher's `Opts::filter_allowed` pattern
//! (`chithi::send_recv_opts`): a fixed allow-list per canonical variant,
//! rather than forwarding caller-controlled flags verbatim.

use super::config::{ReceiveConfig, SendConfig};
use crate::error::{ReplicatorError, Result};
use crate::sanitize;

pub const ZFS_BINARY: &str = "/usr/sbin/zfs";

/// Deterministic POSIX single-quote quoting: wraps `s` in single quotes,
/// escaping embedded single quotes as `'\''`. Used for every token placed
/// into the final shell string (spec §4.7.2 step 4: "Each token is
/// shell-quoted with a deterministic quoter").
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

fn ensure_clean(arg: &str) -> Result<()> {
    if sanitize::is_clean(arg) {
        Ok(())
    } else {
        Err(ReplicatorError::CommandInvalidInput(format!(
            "argument failed sanitization: {arg}"
        )))
    }
}

/// Builds the `zfs send` argument vector (excluding the leading binary),
/// selecting flags from the two canonical variants in spec §4.7.2 step 4:
/// the resume-token variant is restricted to `-PVenv`; otherwise the full
/// `-DLPVbcehnpsvw -R[-s] [-I|-i]` family is available. `-V` is always
/// appended.
pub fn build_send_args(send: &SendConfig) -> Result<Vec<String>> {
    let mut args = vec!["send".to_string()];

    if let Some(token) = &send.resume_token {
        ensure_clean(token)?;
        if send.parsable {
            args.push("-P".to_string());
        }
        if send.embed_data {
            args.push("-e".to_string());
        }
        if send.dry_run {
            args.push("-n".to_string());
        }
        if send.verbose {
            args.push("-v".to_string());
        }
        args.push("-V".to_string());
        args.push("-t".to_string());
        args.push(token.clone());
        return Ok(args);
    }

    if send.replicate {
        args.push("-R".to_string());
        if send.skip_missing {
            args.push("-s".to_string());
        }
    }
    if send.properties {
        args.push("-p".to_string());
    }
    if send.raw {
        args.push("-w".to_string());
    }
    if send.large_blocks {
        args.push("-L".to_string());
    }
    if send.embed_data {
        args.push("-e".to_string());
    }
    if send.holds {
        args.push("-h".to_string());
    }
    if send.backup_stream {
        args.push("-b".to_string());
    }
    if send.compressed {
        args.push("-c".to_string());
    }
    if send.dry_run {
        args.push("-n".to_string());
    }
    if send.verbose {
        args.push("-v".to_string());
    }
    if send.parsable {
        args.push("-P".to_string());
    }
    args.push("-V".to_string());

    if let Some(from) = &send.from_snapshot {
        ensure_clean(from)?;
        args.push(if send.intermediary { "-I" } else { "-i" }.to_string());
        args.push(from.clone());
    }
    ensure_clean(&send.snapshot)?;
    args.push(send.snapshot.clone());
    Ok(args)
}

/// Builds the `zfs receive` argument vector (spec §4.7.2 step 4): `-F`
/// only when there is no resume token (a resumed stream must not force),
/// `-u`, `-s` when resumable, `-d` when use_parent, `-n`/`-v`, plus any
/// `-o`/`-x`.
pub fn build_receive_args(receive: &ReceiveConfig, has_resume_token: bool) -> Result<Vec<String>> {
    let mut args = vec!["receive".to_string()];
    if receive.force && !has_resume_token {
        args.push("-F".to_string());
    }
    if receive.unmounted {
        args.push("-u".to_string());
    }
    if receive.resumable {
        args.push("-s".to_string());
    }
    if receive.use_parent {
        args.push("-d".to_string());
    }
    if receive.dry_run {
        args.push("-n".to_string());
    }
    if receive.verbose {
        args.push("-v".to_string());
    }
    let mut properties: Vec<_> = receive.properties.iter().collect();
    properties.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in properties {
        ensure_clean(key)?;
        ensure_clean(value)?;
        args.push("-o".to_string());
        args.push(format!("{key}={value}"));
    }
    for excluded in &receive.excluded_properties {
        ensure_clean(excluded)?;
        args.push("-x".to_string());
        args.push(excluded.clone());
    }
    ensure_clean(&receive.target)?;
    args.push(receive.target.clone());
    Ok(args)
}

fn quoted_command(binary: &str, args: &[String]) -> String {
    let mut parts = vec![quote(binary)];
    parts.extend(args.iter().map(|a| quote(a)));
    parts.join(" ")
}

/// Composes the full pipeline string (spec §6): `sudo <send> | sudo
/// <receive>` for a local receive, or `sudo <send> | <ssh argv> sudo
/// <receive>` when `receive.remote` is set.
pub fn assemble_pipeline(
    send: &SendConfig,
    receive: &ReceiveConfig,
    managed_known_hosts_path: &str,
) -> Result<String> {
    let has_resume_token = send.resume_token.is_some();
    let send_args = build_send_args(send)?;
    let receive_args = build_receive_args(receive, has_resume_token)?;

    let send_cmd = format!("sudo {}", quoted_command(ZFS_BINARY, &send_args));
    let receive_cmd = format!("sudo {}", quoted_command(ZFS_BINARY, &receive_args));

    let receive_side = match &receive.remote {
        Some(remote) => {
            let ssh_argv = crate::ssh_cmd::assemble_ssh_command(remote, managed_known_hosts_path)?;
            let ssh_quoted = ssh_argv
                .iter()
                .map(|a| quote(a))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{ssh_quoted} {receive_cmd}")
        }
        None => receive_cmd,
    };

    Ok(format!("{send_cmd} | {receive_side}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::config::ReceiveConfig;

    fn send(snapshot: &str) -> SendConfig {
        SendConfig {
            snapshot: snapshot.to_string(),
            verbose: true,
            ..Default::default()
        }
    }

    fn receive(target: &str) -> ReceiveConfig {
        ReceiveConfig {
            target: target.to_string(),
            force: true,
            resumable: true,
            ..Default::default()
        }
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("a'b"), "'a'\\''b'");
    }

    #[test]
    fn resume_token_restricts_flags() {
        let mut s = send("tank/fs@snap2");
        s.resume_token = Some("opaque-token".to_string());
        s.replicate = true; // must be ignored in the resume-token variant
        let args = build_send_args(&s).unwrap();
        assert!(!args.contains(&"-R".to_string()));
        assert!(args.contains(&"-t".to_string()));
        assert!(args.contains(&"-V".to_string()));
    }

    #[test]
    fn non_resume_incremental_uses_dash_i() {
        let mut s = send("tank/fs@snap2");
        s.from_snapshot = Some("tank/fs@snap1".to_string());
        let args = build_send_args(&s).unwrap();
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"tank/fs@snap1".to_string()));
    }

    #[test]
    fn receive_omits_force_when_resuming() {
        let r = receive("store/received");
        let args = build_receive_args(&r, true).unwrap();
        assert!(!args.contains(&"-F".to_string()));
        let args = build_receive_args(&r, false).unwrap();
        assert!(args.contains(&"-F".to_string()));
    }

    #[test]
    fn local_pipeline_has_no_ssh_segment() {
        let pipeline =
            assemble_pipeline(&send("tank/fs@snap1"), &receive("store/received"), "/kh")
                .unwrap();
        assert!(!pipeline.contains("ssh"));
        assert!(pipeline.contains(" | "));
    }

    #[test]
    fn rejects_tainted_snapshot_name() {
        let s = send("tank/fs@snap1`rm -rf /`");
        assert!(build_send_args(&s).is_err());
    }
}
