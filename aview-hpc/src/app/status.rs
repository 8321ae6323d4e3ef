// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::TransferProgress;
use crate::app::services::listing::{self, DirEntry, LastUpdate, ListingError};
use crate::app::services::remote_path;
use crate::app::services::sacct::{self, JobRecord, JobTableError};
use crate::app::session::HpcSession;

const MESSAGE_EXTENSION: &str = ".msg";

fn job_table_error(err: JobTableError) -> AppError {
    AppError::with_message(
        AppErrorKind::ProtocolParse,
        codes::UNPARSEABLE_JOB_TABLE,
        err.to_string(),
    )
    .with_context(err.line().to_string())
}

fn listing_error(err: ListingError) -> AppError {
    let ListingError::Unparseable(line) = &err;
    let line = line.clone();
    AppError::with_message(
        AppErrorKind::ProtocolParse,
        codes::UNPARSEABLE_LISTING,
        err.to_string(),
    )
    .with_context(line)
}

fn normalize_extension(ext: &str) -> String {
    format!(".{}", ext.trim_start_matches('.'))
}

impl HpcSession {
    /// Accounting rows for the configured window.
    pub async fn job_table(&self) -> AppResult<Vec<JobRecord>> {
        self.job_table_for(self.settings.accounting_window_days)
            .await
    }

    pub async fn job_table_for(&self, days: u32) -> AppResult<Vec<JobRecord>> {
        let capture = self.run_clean(&sacct::job_table_command(days)).await?;
        sacct::parse_job_table(&capture.stdout_text(), &self.settings.job_name_suffix)
            .map_err(job_table_error)
    }

    pub async fn dir_status(&self, remote_dir: &str) -> AppResult<Vec<DirEntry>> {
        let capture = self.run_clean(&listing::listing_command(remote_dir)).await?;
        listing::parse_listing(&capture.stdout_text()).map_err(listing_error)
    }

    /// Modification time of the newest result file, if any exists yet.
    pub async fn last_update(&self, remote_dir: &str) -> AppResult<Option<LastUpdate>> {
        let command = listing::last_update_command(remote_dir, &self.settings.result_extensions);
        log::debug!("running `{command}`");
        // Unmatched globs complain on stderr; that only means there is nothing yet.
        let capture = self.exec.exec_capture(&command).await?;
        let year = self.clock.now_utc().year();
        listing::parse_last_update(&capture.stdout_text(), year).map_err(listing_error)
    }

    /// Downloads every file in `remote_dir` whose extension is in `extensions` into
    /// `local_dir`, returning the local paths in name order.
    pub async fn get_results(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        extensions: &[String],
        progress: Option<&dyn TransferProgress>,
    ) -> AppResult<Vec<PathBuf>> {
        let wanted: Vec<String> = extensions.iter().map(|e| normalize_extension(e)).collect();
        let mut names = self.files.list_dir(remote_dir).await?;
        names.sort();
        names.retain(|name| {
            remote_path::extension(name)
                .is_some_and(|ext| wanted.iter().any(|w| w.eq_ignore_ascii_case(ext)))
        });
        if names.is_empty() {
            log::info!("no result files in {remote_dir}");
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(local_dir).await.map_err(|err| {
            AppError::local(format!("cannot create {}: {err}", local_dir.display()))
        })?;
        let mut fetched = Vec::with_capacity(names.len());
        for name in names {
            let remote_file = remote_path::join(remote_dir, &name);
            let local_file = local_dir.join(&name);
            let bytes = self
                .files
                .download_file(&remote_file, &local_file, progress)
                .await?;
            log::info!("downloaded {remote_file} ({bytes} bytes)");
            fetched.push(local_file);
        }
        Ok(fetched)
    }

    /// Text of the solver message file in `remote_dir`.
    pub async fn job_messages(&self, remote_dir: &str) -> AppResult<String> {
        let mut names = self.files.list_dir(remote_dir).await?;
        names.sort();
        let Some(name) = names
            .iter()
            .find(|name| remote_path::extension(name) == Some(MESSAGE_EXTENSION))
        else {
            return Ok(format!("No message file found in {remote_dir}"));
        };

        let scratch = tempfile::Builder::new()
            .prefix("aview-hpc-")
            .tempdir()
            .map_err(|err| AppError::local(format!("cannot create temporary directory: {err}")))?;
        let local_file = scratch.path().join(name);
        self.files
            .download_file(&remote_path::join(remote_dir, name), &local_file, None)
            .await?;
        let bytes = tokio::fs::read(&local_file).await.map_err(|err| {
            AppError::local(format!("cannot read {}: {err}", local_file.display()))
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
