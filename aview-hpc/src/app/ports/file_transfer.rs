// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;

/// Receives byte counts while a download is running.
pub trait TransferProgress: Send + Sync {
    fn on_progress(&self, path: &str, transferred: u64, total: Option<u64>);
}

#[async_trait]
/// File transfer boundary (SFTP) sharing the session of [`super::RemoteExecPort`].
/// Remote paths are always POSIX paths.
pub trait FileTransferPort: Send + Sync {
    /// Writes the local file to `remote_path`, replacing it. Returns bytes written.
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<u64>;

    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<&dyn TransferProgress>,
    ) -> AppResult<u64>;

    /// File names (not paths) in `remote_dir`, without `.` and `..`.
    async fn list_dir(&self, remote_dir: &str) -> AppResult<Vec<String>>;
}
