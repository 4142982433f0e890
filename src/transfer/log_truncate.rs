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

//! Log truncation contract (spec §9): an end-of-life step keyed off
//! `LogConfig`. If the file is under `max_size_bytes`, leave it; otherwise
//! replace it with header lines + a marker + footer lines. Retain-on-
//! failure suppresses truncation for `failed` transfers.

use super::config::LogConfig;
use super::record::TransferStatus;
use std::fs;
use std::path::Path;

pub fn truncate_if_needed(path: &Path, config: &LogConfig, status: TransferStatus) -> std::io::Result<()> {
    if !config.truncate_on_finish {
        return Ok(());
    }
    if status == TransferStatus::Failed && config.retain_on_failure {
        return Ok(());
    }
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.len() <= config.max_size_bytes {
        return Ok(());
    }
    let contents = fs::read_to_string(path).unwrap_or_default();
    let lines: Vec<&str> = contents.lines().collect();
    let header: Vec<&str> = lines.iter().take(config.header_lines).copied().collect();
    let footer: Vec<&str> = lines
        .iter()
        .rev()
        .take(config.footer_lines)
        .rev()
        .copied()
        .collect();
    let mut out = String::new();
    for line in &header {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!(
        "... log truncated: {} bytes removed ...\n",
        metadata.len()
    ));
    for line in &footer {
        out.push_str(line);
        out.push('\n');
    }
    fs::write(path, out)
}

/// Returns the trailing `n` lines of the file at `path`, used to capture
/// the log tail an execution failure surfaces on the record (spec §7
/// kind 3).
pub fn tail(path: &Path, n: usize) -> String {
    let Ok(contents) = fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn leaves_small_file_untouched() {
        let dir = std::env::temp_dir().join(format!("zreplicate-logtrunc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("small.log");
        std::fs::write(&path, "one line\n").unwrap();
        let config = LogConfig {
            max_size_bytes: 1024,
            ..Default::default()
        };
        truncate_if_needed(&path, &config, TransferStatus::Completed).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one line\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn truncates_oversized_file_keeping_header_and_footer() {
        let dir = std::env::temp_dir().join(format!("zreplicate-logtrunc2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("big.log");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..1000 {
            writeln!(file, "line {i}").unwrap();
        }
        drop(file);
        let config = LogConfig {
            max_size_bytes: 10,
            header_lines: 2,
            footer_lines: 2,
            truncate_on_finish: true,
            retain_on_failure: true,
        };
        truncate_if_needed(&path, &config, TransferStatus::Completed).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("line 0"));
        assert!(contents.contains("line 999"));
        assert!(contents.contains("truncated"));
        assert!(!contents.contains("line 500"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn retain_on_failure_suppresses_truncation() {
        let dir = std::env::temp_dir().join(format!("zreplicate-logtrunc3-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("failed.log");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..1000 {
            writeln!(file, "line {i}").unwrap();
        }
        drop(file);
        let config = LogConfig {
            max_size_bytes: 10,
            retain_on_failure: true,
            ..Default::default()
        };
        truncate_if_needed(&path, &config, TransferStatus::Failed).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("line 500"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
