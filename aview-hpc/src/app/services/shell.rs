// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Single-quotes a word for a POSIX shell.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Quotes a directory and appends an unquoted glob, e.g. `'/runs/a b'/*.res`.
pub fn sh_glob_in(dir: &str, pattern: &str) -> String {
    format!("{}/{}", sh_escape(dir.trim_end_matches('/')), pattern)
}
