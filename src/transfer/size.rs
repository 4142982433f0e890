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

//! Size Estimator (C5): a dry-run `zfs send -n -P -v` to compute the exact
//! byte size of a planned stream (spec §4.5). Parses the `size\t<bytes>`
//! line the same way the teacher's `chithi::sys::capture` reads a child's
//! buffered stdout, simplified here since an estimate needs only the final
//! output, not live interleaving.

use super::config::SendConfig;
use super::pipeline::{ZFS_BINARY, build_send_args};
use super::record::{TransferSizeInfo, TransferType};
use log::{debug, warn};
use std::process::Command;

fn transfer_type(send: &SendConfig) -> TransferType {
    if send.from_snapshot.is_none() {
        TransferType::Full
    } else if send.intermediary {
        TransferType::Intermediary
    } else {
        TransferType::Incremental
    }
}

fn parse_size_line(stdout: &str) -> Option<u64> {
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("size\t") {
            if let Ok(bytes) = rest.trim().parse::<u64>() {
                return Some(bytes);
            }
        }
    }
    None
}

/// Runs `zfs send -n -P -v [flags] [source]` with the subset of flags that
/// affect stream size. Never fails the overall `Start`: any spawn error,
/// non-zero exit, or unparsable output yields `None` ("no estimate").
pub fn estimate_size(send: &SendConfig) -> Option<TransferSizeInfo> {
    let mut dry_send = send.clone();
    dry_send.dry_run = true;
    dry_send.parsable = true;
    dry_send.verbose = true;

    let args = match build_send_args(&dry_send) {
        Ok(args) => args,
        Err(e) => {
            warn!("size estimate skipped: could not assemble send args: {e}");
            return None;
        }
    };
    debug!("estimating transfer size via {ZFS_BINARY} {}", args.join(" "));

    let output = match Command::new("sudo").arg(ZFS_BINARY).args(&args).output() {
        Ok(output) => output,
        Err(e) => {
            warn!("size estimate skipped: failed to spawn zfs send -n: {e}");
            return None;
        }
    };
    if !output.status.success() {
        warn!(
            "size estimate skipped: dry-run send exited with {:?}",
            output.status.code()
        );
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let bytes = parse_size_line(&stdout)?;
    Some(TransferSizeInfo {
        calculated_transfer_size: bytes,
        actual_transfer_type: transfer_type(send),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_size_line() {
        let stdout = "resume_token\tabc\nsize\t123456\n";
        assert_eq!(parse_size_line(stdout), Some(123456));
    }

    #[test]
    fn missing_size_line_returns_none() {
        assert_eq!(parse_size_line("nothing here\n"), None);
    }

    #[test]
    fn transfer_type_classification() {
        let mut s = SendConfig {
            snapshot: "tank/fs@b".to_string(),
            ..Default::default()
        };
        assert_eq!(transfer_type(&s), TransferType::Full);
        s.from_snapshot = Some("tank/fs@a".to_string());
        assert_eq!(transfer_type(&s), TransferType::Incremental);
        s.intermediary = true;
        assert_eq!(transfer_type(&s), TransferType::Intermediary);
    }
}
