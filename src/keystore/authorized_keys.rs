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

//! Parsing and serializing the managed `authorized_keys` file (one line per
//! [`AuthorizedKeyEntry`], spec §3/§4.3).

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

const KEY_TYPE_PREFIXES: [&str; 4] = ["ssh-ed25519", "ssh-rsa", "ecdsa-sha2-nistp", "ssh-dss"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKeyEntry {
    pub key_type: String,
    pub key_body: String,
    pub comment: String,
    pub options: Vec<String>,
}

impl AuthorizedKeyEntry {
    pub fn new(key_type: String, key_body: String, comment: String, options: Vec<String>) -> Self {
        Self {
            key_type,
            key_body,
            comment,
            options,
        }
    }

    /// Splits a single options token ("opt1,opt2=\"a,b\"") into individual
    /// option strings, respecting double-quoted regions as commas inside a
    /// quote do not terminate the option.
    fn split_options(token: &str) -> Vec<String> {
        let mut options = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        for c in token.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(c);
                }
                ',' if !in_quotes => {
                    options.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            }
        }
        if !current.is_empty() {
            options.push(current);
        }
        options
    }

    fn join_options(options: &[String]) -> String {
        options.join(",")
    }

    /// Tokenizes a line on whitespace, keeping double-quoted regions intact
    /// as a single token (so a quoted option value containing a space is not
    /// split apart).
    fn tokenize(line: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        for c in line.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(c);
                }
                c if c.is_whitespace() && !in_quotes => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(c),
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens
    }

    fn is_key_type(token: &str) -> bool {
        KEY_TYPE_PREFIXES.iter().any(|p| token.starts_with(p))
    }

    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let tokens = Self::tokenize(line);
        if tokens.is_empty() {
            return None;
        }
        let (options, rest) = if Self::is_key_type(&tokens[0]) {
            (Vec::new(), &tokens[..])
        } else {
            (Self::split_options(&tokens[0]), &tokens[1..])
        };
        if rest.len() < 2 {
            return None;
        }
        let key_type = rest[0].clone();
        let key_body = rest[1].clone();
        let comment = if rest.len() > 2 {
            rest[2..].join(" ")
        } else {
            String::new()
        };
        Some(Self {
            key_type,
            key_body,
            comment,
            options,
        })
    }

    pub fn format(&self) -> String {
        let mut line = String::new();
        if !self.options.is_empty() {
            write!(line, "{} ", Self::join_options(&self.options)).unwrap();
        }
        write!(line, "{} {}", self.key_type, self.key_body).unwrap();
        if !self.comment.is_empty() {
            write!(line, " {}", self.comment).unwrap();
        }
        line
    }
}

pub fn read_entries(path: &Path) -> io::Result<Vec<AuthorizedKeyEntry>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.lines().filter_map(AuthorizedKeyEntry::parse).collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Rewrites the entire file with mode 0600, one entry per line.
pub fn write_entries(path: &Path, entries: &[AuthorizedKeyEntry]) -> io::Result<()> {
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
    fn parses_simple_line() {
        let entry =
            AuthorizedKeyEntry::parse("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 peer-a").unwrap();
        assert_eq!(entry.key_type, "ssh-ed25519");
        assert_eq!(entry.key_body, "AAAAC3NzaC1lZDI1NTE5");
        assert_eq!(entry.comment, "peer-a");
        assert!(entry.options.is_empty());
    }

    #[test]
    fn parses_options_with_quoted_comma() {
        let line =
            r#"command="rsync --server",no-pty ssh-ed25519 AAAA peer-b"#;
        let entry = AuthorizedKeyEntry::parse(line).unwrap();
        assert_eq!(entry.options.len(), 2);
        assert_eq!(entry.options[0], r#"command="rsync --server""#);
        assert_eq!(entry.options[1], "no-pty");
        assert_eq!(entry.comment, "peer-b");
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        assert!(AuthorizedKeyEntry::parse("# comment").is_none());
        assert!(AuthorizedKeyEntry::parse("   ").is_none());
    }

    #[test]
    fn parse_then_format_is_a_fixed_point() {
        let line = r#"no-pty ssh-rsa AAAAB3NzaC1yc2E= peer-c"#;
        let entry = AuthorizedKeyEntry::parse(line).unwrap();
        assert_eq!(entry.format(), line);
    }
}
