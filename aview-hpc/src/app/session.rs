// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    ClockPort, Connection, ConnectorPort, ExecCapture, FileTransferPort, RemoteExecPort,
};
use crate::app::services::shell::sh_escape;
use crate::app::settings::SessionSettings;
use crate::app::submission::SubmissionState;
use crate::app::types::{ConnectTarget, SubmissionResult};
use crate::app::upload_cache::UploadCache;

/// One authenticated connection to the cluster login node.
///
/// A session submits at most one job unless the caller asks to rebind it; the binding
/// (remote dir, job name, job id) is what the status queries default to.
pub struct HpcSession {
    pub(super) host: String,
    pub(super) username: String,
    pub(super) settings: SessionSettings,
    pub(super) exec: Arc<dyn RemoteExecPort>,
    pub(super) files: Arc<dyn FileTransferPort>,
    pub(super) clock: Arc<dyn ClockPort>,
    pub(super) state: SubmissionState,
    pub(super) binding: Option<SubmissionResult>,
    pub(super) uploads: UploadCache,
}

impl HpcSession {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        connection: Connection,
        clock: Arc<dyn ClockPort>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            settings,
            exec: connection.exec,
            files: connection.files,
            clock,
            state: SubmissionState::Idle,
            binding: None,
            uploads: UploadCache::new(),
        }
    }

    /// Connects and authenticates, retrying while the server times the handshake out.
    ///
    /// Any other failure (bad credentials, unknown host, refused connection) is returned
    /// at once.
    pub async fn open(
        connector: &dyn ConnectorPort,
        clock: Arc<dyn ClockPort>,
        target: &ConnectTarget,
        settings: SessionSettings,
    ) -> AppResult<Self> {
        let mut attempt = 0u32;
        let connection = loop {
            attempt += 1;
            match connector.connect(target).await {
                Ok(connection) => break connection,
                Err(err) if err.code() == codes::AUTHENTICATION_TIMEOUT => {
                    let Some(delay) = settings.connect_retry.delay_after(attempt) else {
                        return Err(err);
                    };
                    log::warn!(
                        "authentication with {} timed out (attempt {attempt}); retrying in {}s",
                        target.host,
                        delay.as_secs()
                    );
                    clock.sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };
        log::info!("connected to {} as {}", target.host, target.username);
        Ok(Self::new(
            target.host.clone(),
            target.username.clone(),
            connection,
            clock,
            settings,
        ))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn job_id(&self) -> Option<u64> {
        self.binding.as_ref().map(|b| b.job_id)
    }

    pub fn job_name(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.job_name.as_str())
    }

    pub fn remote_dir(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.remote_dir.as_str())
    }

    /// Runs `command` and fails when anything shows up on stderr.
    pub(super) async fn run_clean(&self, command: &str) -> AppResult<ExecCapture> {
        log::debug!("running `{command}`");
        let capture = self.exec.exec_capture(command).await?;
        if capture.has_stderr() {
            return Err(AppError::remote_stderr(command, &capture.stderr_text()));
        }
        Ok(capture)
    }

    /// Creates a fresh, group-writable directory named `<job_name>.<random>`.
    pub async fn make_remote_dir(&self, job_name: &str) -> AppResult<String> {
        let template = format!(
            "{job_name}.{}",
            "X".repeat(self.settings.tempdir_suffix_len.max(3))
        );
        let command = match &self.settings.remote_tempdir {
            Some(parent) => format!(
                "mktemp -d -p {} {}",
                sh_escape(parent),
                sh_escape(&template)
            ),
            None => format!("mktemp -d {}", sh_escape(&template)),
        };
        let capture = self.exec.exec_capture(&command).await?;
        let dir = capture.stdout_text().trim().to_string();
        if capture.has_stderr() || dir.is_empty() {
            let detail = capture.stderr_text();
            let detail = if detail.trim().is_empty() {
                "mktemp printed no directory".to_string()
            } else {
                detail.trim().to_string()
            };
            return Err(AppError::with_message(
                AppErrorKind::RemoteOperation,
                codes::REMOTE_ERROR,
                format!("could not create a remote directory for {job_name}"),
            )
            .with_context(detail));
        }

        let chmod = format!("chmod 775 {}", sh_escape(&dir));
        let capture = self.exec.exec_capture(&chmod).await?;
        if capture.has_stderr() || !capture.stdout.iter().all(u8::is_ascii_whitespace) {
            let mut detail = capture.stdout_text();
            detail.push_str(&capture.stderr_text());
            return Err(AppError::remote_stderr(&chmod, &detail));
        }
        log::info!("created remote directory {dir}");
        Ok(dir)
    }

    pub async fn close(self) -> AppResult<()> {
        log::debug!("closing session to {}", self.host);
        self.exec.close().await
    }
}
