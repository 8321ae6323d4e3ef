// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use std::future::Future;
use std::path::Path;
use tokio::fs as tokiofs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::adapters::ssh::error::SessionClosed;
use crate::app::ports::TransferProgress;

use super::SessionManager;

const BLOCK_SIZE: usize = 64 * 1024;

/// Runs `close` whether or not `result` is an error, then returns `result`.
async fn finish<T, E: std::fmt::Display>(
    result: Result<T>,
    close: impl Future<Output = std::result::Result<(), E>>,
) -> Result<T> {
    if let Err(err) = close.await {
        log::debug!("closing sftp channel failed: {err}");
    }
    result
}

async fn write_remote(sftp: &SftpSession, local_path: &Path, remote_path: &str) -> Result<u64> {
    let mut lf = tokiofs::File::open(local_path)
        .await
        .with_context(|| format!("open {}", local_path.display()))?;
    let flags = OpenFlags::WRITE
        .union(OpenFlags::CREATE)
        .union(OpenFlags::TRUNCATE);
    let mut rfile = sftp
        .open_with_flags(remote_path, flags)
        .await
        .with_context(|| format!("open remote {remote_path}"))?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut written = 0u64;
    loop {
        let n = lf.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        rfile.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    rfile.flush().await?;
    rfile.shutdown().await?;
    Ok(written)
}

async fn read_remote(
    sftp: &SftpSession,
    remote_path: &str,
    local_path: &Path,
    progress: Option<&dyn TransferProgress>,
) -> Result<u64> {
    let total = sftp.metadata(remote_path).await?.size;
    if let Some(parent) = local_path.parent() {
        tokiofs::create_dir_all(parent).await?;
    }
    let mut rfile = sftp.open(remote_path).await?;
    let mut lfile = tokiofs::File::create(local_path)
        .await
        .with_context(|| format!("create {}", local_path.display()))?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut transferred = 0u64;
    loop {
        let n = rfile.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        lfile.write_all(&buf[..n]).await?;
        transferred += n as u64;
        if let Some(progress) = progress {
            progress.on_progress(remote_path, transferred, total);
        }
    }
    lfile.flush().await?;
    Ok(transferred)
}

async fn file_names(sftp: &SftpSession, remote_dir: &str) -> Result<Vec<String>> {
    let entries = sftp.read_dir(remote_dir).await?;
    Ok(entries
        .filter(|entry| !entry.metadata().is_dir())
        .map(|entry| entry.file_name())
        .filter(|name| name != "." && name != "..")
        .collect())
}

impl SessionManager {
    /// Opens a fresh sftp subsystem channel; callers close it through [`finish`].
    async fn sftp(&self) -> Result<SftpSession> {
        self.ensure_connected().await?;
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(SessionClosed)?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Writes `local_path` to `remote_path`, replacing any existing file.
    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let sftp = self.sftp().await?;
        log::debug!(
            "uploading over sftp: {} -> {remote_path}",
            local_path.display()
        );
        let result = write_remote(&sftp, local_path, remote_path).await;
        finish(result, sftp.close()).await
    }

    pub async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<&dyn TransferProgress>,
    ) -> Result<u64> {
        let sftp = self.sftp().await?;
        let result = read_remote(&sftp, remote_path, local_path, progress).await;
        finish(result, sftp.close()).await
    }

    /// Names of the non-directory entries of `remote_dir`.
    pub async fn list_dir(&self, remote_dir: &str) -> Result<Vec<String>> {
        let sftp = self.sftp().await?;
        let result = file_names(&sftp, remote_dir).await;
        finish(result, sftp.close()).await
    }
}
