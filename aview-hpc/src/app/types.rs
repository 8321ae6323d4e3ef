// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

#[derive(Clone)]
pub enum Credential {
    Password(String),
    IdentityFile {
        path: PathBuf,
        passphrase: Option<String>,
        /// Answers keyboard-interactive prompts when the server asks for a second factor.
        password: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::IdentityFile { path, .. } => f
                .debug_struct("IdentityFile")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub known_hosts_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub control_file: PathBuf,
    /// Resolved from the control file when absent.
    pub model_file: Option<PathBuf>,
    pub aux_files: Vec<PathBuf>,
    /// Appended to the submit command as `--<name> <value>`, in order.
    pub options: Vec<(String, String)>,
}

impl SubmissionRequest {
    pub fn new(control_file: impl Into<PathBuf>) -> Self {
        Self {
            control_file: control_file.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    pub remote_dir: String,
    pub job_name: String,
    pub job_id: u64,
}

/// Parallel lists in request order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub remote_dirs: Vec<String>,
    pub job_names: Vec<String>,
    pub job_ids: Vec<u64>,
}

impl BatchOutcome {
    pub fn push(&mut self, result: SubmissionResult) {
        self.remote_dirs.push(result.remote_dir);
        self.job_names.push(result.job_name);
        self.job_ids.push(result.job_id);
    }

    pub fn len(&self) -> usize {
        self.job_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
    }
}
