// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use crate::app::services::retry::RetryPolicy;

pub const DEFAULT_SUBMIT_CMD: &str = "asub";
pub const DEFAULT_MODEL_EXTENSION: &str = "adm";
pub const DEFAULT_RESULT_EXTENSIONS: [&str; 5] = [".res", ".req", ".gra", ".msg", ".out"];
pub const DEFAULT_JOB_NAME_SUFFIX: &str = ".slurm";
pub const DEFAULT_ACCOUNTING_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_TEMPDIR_SUFFIX_LEN: usize = 4;

/// Everything a session needs to know about the cluster side.
///
/// | field                  | default                              |
/// |------------------------|--------------------------------------|
/// | `submit_cmd`           | `asub`                               |
/// | `remote_tempdir`       | none (`mktemp` default location)     |
/// | `model_extension`      | `adm`                                |
/// | `result_extensions`    | `.res .req .gra .msg .out`           |
/// | `job_name_suffix`      | `.slurm` (stripped from job names)   |
/// | `accounting_window_days` | 7                                  |
/// | `tempdir_suffix_len`   | 4 (`<job>.XXXX`)                     |
/// | `throttle_interval`    | 60 s                                 |
/// | `pacing`               | 10 s between batch submissions       |
/// | `batch_retry`          | 120 attempts, 60 s apart             |
/// | `connect_retry`        | 1440 attempts, 60 s apart (24 h)     |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub submit_cmd: String,
    pub remote_tempdir: Option<String>,
    pub model_extension: String,
    pub result_extensions: Vec<String>,
    pub job_name_suffix: String,
    pub accounting_window_days: u32,
    pub tempdir_suffix_len: usize,
    pub throttle_interval: Duration,
    pub pacing: Duration,
    pub batch_retry: RetryPolicy,
    pub connect_retry: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            submit_cmd: DEFAULT_SUBMIT_CMD.to_string(),
            remote_tempdir: None,
            model_extension: DEFAULT_MODEL_EXTENSION.to_string(),
            result_extensions: DEFAULT_RESULT_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            job_name_suffix: DEFAULT_JOB_NAME_SUFFIX.to_string(),
            accounting_window_days: DEFAULT_ACCOUNTING_WINDOW_DAYS,
            tempdir_suffix_len: DEFAULT_TEMPDIR_SUFFIX_LEN,
            throttle_interval: Duration::from_secs(60),
            pacing: Duration::from_secs(10),
            batch_retry: RetryPolicy::fixed(120, Duration::from_secs(60)),
            connect_retry: RetryPolicy::fixed(60 * 24, Duration::from_secs(60)),
        }
    }
}
