// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use thiserror::Error;

pub const JOB_TABLE_COLUMNS: [&str; 11] = [
    "jobid",
    "jobname%-40",
    "start",
    "end",
    "Elapsed",
    "state",
    "timelimit",
    "nnodes",
    "ncpus",
    "submitline%-70",
    "workdir%-70",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const FIELD_DELIMITER: char = ',';

/// `sacct` invocation for jobs active within the last `days` days, one line per allocation.
pub fn job_table_command(days: u32) -> String {
    format!(
        "sacct -S now-{days}days -X -P --delimiter={FIELD_DELIMITER} -o {}",
        JOB_TABLE_COLUMNS.join(",")
    )
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobTableError {
    #[error("expected {expected} fields, found {found}: {line}")]
    FieldCount {
        expected: usize,
        found: usize,
        line: String,
    },
    #[error("invalid {field} value {value:?}: {line}")]
    InvalidField {
        field: &'static str,
        value: String,
        line: String,
    },
}

impl JobTableError {
    pub fn line(&self) -> &str {
        match self {
            JobTableError::FieldCount { line, .. } | JobTableError::InvalidField { line, .. } => {
                line
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Timeout,
    /// Includes `CANCELLED by <uid>`.
    Cancelled,
    Failed,
    NodeFail,
    OutOfMemory,
    Other(String),
}

impl JobState {
    pub fn parse(raw: &str) -> Self {
        let normalized = normalize_slurm_state(raw);
        match normalized.as_str() {
            "PENDING" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "COMPLETED" => JobState::Completed,
            "TIMEOUT" => JobState::Timeout,
            "CANCELLED" => JobState::Cancelled,
            "FAILED" => JobState::Failed,
            "NODE_FAIL" => JobState::NodeFail,
            "OUT_OF_MEMORY" => JobState::OutOfMemory,
            _ => JobState::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Timeout => "TIMEOUT",
            JobState::Cancelled => "CANCELLED",
            JobState::Failed => "FAILED",
            JobState::NodeFail => "NODE_FAIL",
            JobState::OutOfMemory => "OUT_OF_MEMORY",
            JobState::Other(raw) => raw,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Drops qualifiers such as `CANCELLED by 1234`, `CANCELLED+` or `FAILED (x)`.
fn normalize_slurm_state(raw: &str) -> String {
    raw.trim()
        .split(|c: char| c.is_whitespace() || c == '+' || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// One row of the accounting table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub job_name: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub start: Option<NaiveDateTime>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub end: Option<NaiveDateTime>,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub state: JobState,
    pub time_limit: String,
    pub nodes: u32,
    pub cpus: u32,
    pub submit_line: String,
    pub work_dir: String,
}

impl JobRecord {
    /// Numeric job id; `None` for array or heterogeneous ids like `123_4`.
    pub fn numeric_id(&self) -> Option<u64> {
        self.job_id.parse().ok()
    }
}

fn serialize_timestamp<S: Serializer>(
    value: &Option<NaiveDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(ts) => serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string()),
        None => serializer.serialize_none(),
    }
}

fn serialize_duration<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_slurm_duration(*value))
}

/// `HH:MM:SS`, or `D-HH:MM:SS` past one day, matching `sacct` output.
pub fn format_slurm_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

fn is_unknown(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("unknown") || value.eq_ignore_ascii_case("none")
}

/// Parse SLURM durations like "D-HH:MM:SS", "HH:MM:SS" or "MM:SS".
/// "Unknown" is reported for jobs that never started and counts as zero.
fn parse_elapsed(value: &str) -> Option<Duration> {
    if value.eq_ignore_ascii_case("unknown") {
        return Some(Duration::ZERO);
    }

    let (days, clock) = match value.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, value),
    };

    let parts = clock
        .split(':')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };

    let total = days
        .saturating_mul(86_400)
        .saturating_add(h * 3600)
        .saturating_add(m * 60)
        .saturating_add(s);
    Some(Duration::from_secs(total))
}

fn parse_timestamp(value: &str) -> Result<Option<NaiveDateTime>, ()> {
    if is_unknown(value) {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(Some)
        .map_err(|_| ())
}

fn is_header(fields: &[&str]) -> bool {
    fields
        .first()
        .is_some_and(|first| first.trim().eq_ignore_ascii_case("jobid"))
}

/// Parses one data line of the job table.
pub fn parse_job_line(line: &str, name_suffix: &str) -> Result<JobRecord, JobTableError> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
    if fields.len() != JOB_TABLE_COLUMNS.len() {
        return Err(JobTableError::FieldCount {
            expected: JOB_TABLE_COLUMNS.len(),
            found: fields.len(),
            line: line.to_string(),
        });
    }

    let invalid = |field: &'static str, value: &str| JobTableError::InvalidField {
        field,
        value: value.to_string(),
        line: line.to_string(),
    };

    let job_name = if name_suffix.is_empty() {
        fields[1]
    } else {
        fields[1].strip_suffix(name_suffix).unwrap_or(fields[1])
    };
    let start = parse_timestamp(fields[2]).map_err(|_| invalid("start", fields[2]))?;
    let end = parse_timestamp(fields[3]).map_err(|_| invalid("end", fields[3]))?;
    let elapsed = parse_elapsed(fields[4]).ok_or_else(|| invalid("elapsed", fields[4]))?;
    let nodes = fields[7]
        .parse::<u32>()
        .map_err(|_| invalid("nnodes", fields[7]))?;
    let cpus = fields[8]
        .parse::<u32>()
        .map_err(|_| invalid("ncpus", fields[8]))?;

    Ok(JobRecord {
        job_id: fields[0].to_string(),
        job_name: job_name.to_string(),
        start,
        end,
        elapsed,
        state: JobState::parse(fields[5]),
        time_limit: fields[6].to_string(),
        nodes,
        cpus,
        submit_line: fields[9].to_string(),
        work_dir: fields[10].to_string(),
    })
}

/// Parses `sacct -P` output produced by [`job_table_command`], in emitted order.
/// The header row and blank lines are skipped; any other bad line fails the whole table.
pub fn parse_job_table(output: &str, name_suffix: &str) -> Result<Vec<JobRecord>, JobTableError> {
    let mut records = Vec::new();
    let mut header_seen = false;
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        if !header_seen {
            header_seen = true;
            let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
            if is_header(&fields) {
                continue;
            }
        }
        records.push(parse_job_line(line, name_suffix)?);
    }
    Ok(records)
}

pub fn count_running(records: &[JobRecord]) -> usize {
    records.iter().filter(|r| r.state.is_running()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const HEADER: &str =
        "JobID,JobName,Start,End,Elapsed,State,Timelimit,NNodes,NCPUS,SubmitLine,WorkDir";

    #[test]
    fn builds_sacct_command() {
        assert_eq!(
            job_table_command(7),
            "sacct -S now-7days -X -P --delimiter=, -o jobid,jobname%-40,start,end,Elapsed,state,timelimit,nnodes,ncpus,submitline%-70,workdir%-70"
        );
    }

    #[test]
    fn parses_running_job_with_unknown_end() {
        let output = format!(
            "{HEADER}\n123,job1,2024-01-01T00:00:00,Unknown,Unknown,RUNNING,01:00:00,1,4,sbatch x,/tmp/job1\n"
        );
        let records = parse_job_table(&output, ".slurm").unwrap();
        assert_eq!(records.len(), 1);
        let job = &records[0];
        assert_eq!(job.job_id, "123");
        assert_eq!(job.numeric_id(), Some(123));
        assert_eq!(job.job_name, "job1");
        assert_eq!(
            job.start,
            Some(
                NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
        assert_eq!(job.end, None);
        assert_eq!(job.elapsed, Duration::ZERO);
        assert_eq!(format_slurm_duration(job.elapsed), "00:00:00");
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.time_limit, "01:00:00");
        assert_eq!((job.nodes, job.cpus), (1, 4));
        assert_eq!(job.submit_line, "sbatch x");
        assert_eq!(job.work_dir, "/tmp/job1");
    }

    #[test]
    fn strips_wrapper_suffix_and_normalizes_states() {
        let output = format!(
            "{HEADER}\n\
             200,car_run.slurm,2024-03-02T10:00:00,2024-03-03T12:30:05,1-02:30:05,COMPLETED,2-00:00:00,2,16,sbatch car_run.slurm,/scratch/car_run.x1y2\n\
             201,wheel.slurm,Unknown,Unknown,00:00:00,CANCELLED by 4242,01:00:00,1,1,sbatch wheel.slurm,/scratch/wheel.a1b2\n\
             202,slurmy,None,None,Unknown,PENDING,UNLIMITED,1,8,sbatch slurmy,/scratch/slurmy\n"
        );
        let records = parse_job_table(&output, ".slurm").unwrap();
        assert_eq!(records[0].job_name, "car_run");
        assert_eq!(records[0].elapsed, Duration::from_secs(86_400 + 2 * 3600 + 30 * 60 + 5));
        let end = records[0].end.unwrap();
        assert_eq!(end.format(TIMESTAMP_FORMAT).to_string(), "2024-03-03T12:30:05");
        assert_eq!(records[1].state, JobState::Cancelled);
        assert_eq!(records[1].start, None);
        assert_eq!(records[2].job_name, "slurmy");
        assert_eq!(records[2].state, JobState::Pending);
        assert_eq!(count_running(&records), 0);
    }

    #[test]
    fn keeps_order_and_unknown_states() {
        let output = "1,a,Unknown,Unknown,Unknown,REQUEUED,01:00:00,1,1,sbatch a,/a\n\
                      2,b,Unknown,Unknown,Unknown,RUNNING,01:00:00,1,1,sbatch b,/b\n";
        let records = parse_job_table(output, ".slurm").unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
        assert_eq!(records[0].state, JobState::Other("REQUEUED".to_string()));
        assert_eq!(count_running(&records), 1);
    }

    #[test]
    fn wrong_field_count_fails_loudly() {
        let output = format!("{HEADER}\n123,job1,2024-01-01T00:00:00,Unknown,RUNNING\n");
        let err = parse_job_table(&output, ".slurm").unwrap_err();
        assert!(matches!(
            err,
            JobTableError::FieldCount {
                expected: 11,
                found: 5,
                ..
            }
        ));
        assert_eq!(err.line(), "123,job1,2024-01-01T00:00:00,Unknown,RUNNING");
    }

    #[test]
    fn bad_timestamp_is_an_error() {
        let output =
            "7,job,yesterday,Unknown,00:00:01,RUNNING,01:00:00,1,1,sbatch job,/tmp/job\n";
        let err = parse_job_table(output, ".slurm").unwrap_err();
        assert!(matches!(err, JobTableError::InvalidField { field: "start", .. }));
    }

    #[test]
    fn elapsed_formats() {
        assert_eq!(parse_elapsed("05:07"), Some(Duration::from_secs(307)));
        assert_eq!(parse_elapsed("10:00:00"), Some(Duration::from_secs(36_000)));
        assert_eq!(parse_elapsed("x"), None);
        assert_eq!(format_slurm_duration(Duration::from_secs(90_061)), "1-01:01:01");
    }

    #[test]
    fn empty_output_is_empty_table() {
        assert!(parse_job_table(&format!("{HEADER}\n"), ".slurm").unwrap().is_empty());
        assert!(parse_job_table("", ".slurm").unwrap().is_empty());
    }

    #[test]
    fn serializes_canonical_text() {
        let record = parse_job_line(
            "9,j,2024-01-01T00:00:00,Unknown,Unknown,RUNNING,01:00:00,1,4,sbatch x,/tmp/j",
            ".slurm",
        )
        .unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["start"], "2024-01-01T00:00:00");
        assert!(value["end"].is_null());
        assert_eq!(value["elapsed"], "00:00:00");
        assert_eq!(value["state"], "RUNNING");
    }
}
