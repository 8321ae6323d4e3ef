// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Parsers for `ls -l` output on the cluster.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};
use thiserror::Error;

use super::sacct::TIMESTAMP_FORMAT;
use super::shell::{sh_escape, sh_glob_in};

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListingError {
    #[error("could not parse listing line: {0}")]
    Unparseable(String),
}

/// One file from `ls -l --time-style=long-iso`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub permissions: String,
    pub links: u64,
    pub owner: String,
    pub group: String,
    pub size: u64,
    #[serde(serialize_with = "serialize_timestamp")]
    pub modified: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastUpdate {
    #[serde(serialize_with = "serialize_timestamp")]
    pub modified: NaiveDateTime,
    pub file: String,
}

fn serialize_timestamp<S: Serializer>(
    value: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
}

pub fn listing_command(remote_dir: &str) -> String {
    format!("ls -l --time-style=long-iso {}", sh_escape(remote_dir))
}

/// Newest-first listing of the result files in `remote_dir`.
pub fn last_update_command(remote_dir: &str, extensions: &[String]) -> String {
    let globs: Vec<String> = extensions
        .iter()
        .map(|ext| sh_glob_in(remote_dir, &format!("*.{}", ext.trim_start_matches('.'))))
        .collect();
    format!("ls -lt {}", globs.join(" "))
}

/// Splits off the next whitespace-delimited token.
fn next_field(rest: &str) -> Option<(&str, &str)> {
    let rest = rest.trim_start();
    if rest.is_empty() {
        return None;
    }
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some((&rest[..end], &rest[end..]))
}

/// File type char, nine mode chars, then an optional `.`, `+` or `@` marker.
fn parse_permissions(token: &str) -> Option<&str> {
    if !token.is_ascii() || token.len() < 10 {
        return None;
    }
    let (mode, marker) = token.split_at(10);
    let mut chars = mode.chars();
    let file_type = chars.next()?;
    if !"-dlcbpsD".contains(file_type) {
        return None;
    }
    if !chars.all(|c| "rwxsStT-".contains(c)) {
        return None;
    }
    matches!(marker, "" | "." | "+" | "@").then_some(mode)
}

fn remainder_name(rest: &str) -> Option<&str> {
    let name = rest.trim_start();
    (!name.is_empty()).then_some(name)
}

struct Preamble<'a> {
    permissions: &'a str,
    links: u64,
    owner: &'a str,
    group: &'a str,
    size: u64,
    rest: &'a str,
}

fn parse_preamble(line: &str) -> Option<Preamble<'_>> {
    let (perm_token, rest) = next_field(line)?;
    let permissions = parse_permissions(perm_token)?;
    let (links, rest) = next_field(rest)?;
    let (owner, rest) = next_field(rest)?;
    let (group, rest) = next_field(rest)?;
    let (size, rest) = next_field(rest)?;
    Some(Preamble {
        permissions,
        links: links.parse().ok()?,
        owner,
        group,
        size: size.parse().ok()?,
        rest,
    })
}

fn parse_long_iso_line(line: &str) -> Option<DirEntry> {
    let pre = parse_preamble(line)?;
    let (date, rest) = next_field(pre.rest)?;
    let (time, rest) = next_field(rest)?;
    let name = remainder_name(rest)?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    Some(DirEntry {
        name: name.to_string(),
        permissions: pre.permissions.to_string(),
        links: pre.links,
        owner: pre.owner.to_string(),
        group: pre.group.to_string(),
        size: pre.size,
        modified: NaiveDateTime::new(date, time),
    })
}

/// Parses a single non-`total` line of `ls -l --time-style=long-iso`.
pub fn parse_listing_line(line: &str) -> Result<DirEntry, ListingError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    parse_long_iso_line(line).ok_or_else(|| ListingError::Unparseable(line.to_string()))
}

pub fn parse_listing(output: &str) -> Result<Vec<DirEntry>, ListingError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("total"))
        .map(parse_listing_line)
        .collect()
}

fn parse_month(token: &str) -> Option<u32> {
    let lower = token.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|idx| idx as u32 + 1)
}

/// Default `ls -l` timestamp: `Mon DD HH:MM` for recent files, `Mon DD YYYY` for old ones.
/// The recent form carries no year, so `current_year` is assumed.
fn parse_default_time_line(line: &str, current_year: i32) -> Option<LastUpdate> {
    let pre = parse_preamble(line)?;
    let (month, rest) = next_field(pre.rest)?;
    let (day, rest) = next_field(rest)?;
    let (time_or_year, rest) = next_field(rest)?;
    let file = remainder_name(rest)?;

    let month = parse_month(month)?;
    let day: u32 = day.parse().ok()?;
    let (year, time) = match time_or_year.split_once(':') {
        Some(_) => (
            current_year,
            NaiveTime::parse_from_str(time_or_year, "%H:%M").ok()?,
        ),
        None => (time_or_year.parse().ok()?, NaiveTime::from_hms_opt(0, 0, 0)?),
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(LastUpdate {
        modified: NaiveDateTime::new(date, time),
        file: file.to_string(),
    })
}

/// Reads the newest entry of [`last_update_command`] output. `None` when no result file
/// exists yet.
pub fn parse_last_update(
    output: &str,
    current_year: i32,
) -> Result<Option<LastUpdate>, ListingError> {
    let Some(line) = output.lines().find(|line| !line.trim().is_empty()) else {
        return Ok(None);
    };
    let line = line.strip_suffix('\r').unwrap_or(line);
    parse_default_time_line(line, current_year)
        .map(Some)
        .ok_or_else(|| ListingError::Unparseable(line.to_string()))
}
