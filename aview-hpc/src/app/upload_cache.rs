// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{FileTransferPort, RemoteExecPort};
use crate::app::services::remote_path;
use crate::app::services::shell::sh_escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAction {
    Transferred,
    Copied,
}

/// Local files already placed on the cluster during one session.
///
/// Keyed by canonical local path: the same path submitted again is copied remotely
/// with `cp` instead of being sent over the wire a second time.
#[derive(Debug, Default)]
pub struct UploadCache {
    records: HashMap<PathBuf, String>,
}

impl UploadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `local_file` at `<remote_dir>/<file name>`.
    ///
    /// Bytes are read from `staged_copy`, which may differ from `local_file` when the
    /// file was rewritten before upload; identity always comes from `local_file`.
    pub async fn ensure_uploaded(
        &mut self,
        exec: &dyn RemoteExecPort,
        files: &dyn FileTransferPort,
        local_file: &Path,
        staged_copy: &Path,
        remote_dir: &str,
    ) -> AppResult<(String, UploadAction)> {
        let key = tokio::fs::canonicalize(local_file).await.map_err(|err| {
            AppError::local(format!("cannot resolve {}: {err}", local_file.display()))
        })?;
        let name = remote_path::local_file_name(local_file).ok_or_else(|| {
            AppError::invalid_argument(format!("{} has no file name", local_file.display()))
        })?;
        let remote_file = remote_path::join(remote_dir, &name);

        if let Some(previous) = self.records.get(&key) {
            let command = format!("cp {} {}", sh_escape(previous), sh_escape(&remote_file));
            log::info!("copying {previous} -> {remote_file}");
            let capture = exec.exec_capture(&command).await?;
            if capture.has_stderr() {
                return Err(AppError::remote_stderr(&command, &capture.stderr_text()));
            }
            return Ok((remote_file, UploadAction::Copied));
        }

        let size = tokio::fs::metadata(staged_copy)
            .await
            .map(|meta| meta.len())
            .unwrap_or_default();
        log::info!(
            "uploading {} ({:.1} kB) -> {remote_file}",
            local_file.display(),
            size as f64 / 1e3
        );
        files.upload_file(staged_copy, &remote_file).await?;
        self.records.insert(key, remote_file.clone());
        Ok((remote_file, UploadAction::Transferred))
    }
}
