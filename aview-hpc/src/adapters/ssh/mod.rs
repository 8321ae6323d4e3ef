// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::network;
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    Connection, ConnectorPort, ExecCapture, FileTransferPort, RemoteExecPort, TransferProgress,
};
use crate::app::types::ConnectTarget;

mod error;
mod session;

pub use error::{AuthenticationFailure, AuthenticationTimeout, ConnectFailure, SessionClosed};
pub use session::{SessionManager, SshParams};

pub const DEFAULT_KEEPALIVE_SECS: u64 = 30;
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(60);

fn has_cause<T: std::error::Error + Send + Sync + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<T>())
}

fn is_connection_loss(err: &anyhow::Error) -> bool {
    if has_cause::<SessionClosed>(err) {
        return true;
    }
    err.chain().any(|cause| {
        if let Some(ssh_err) = cause.downcast_ref::<russh::Error>() {
            return match ssh_err {
                russh::Error::Disconnect
                | russh::Error::HUP
                | russh::Error::ConnectionTimeout
                | russh::Error::KeepaliveTimeout
                | russh::Error::InactivityTimeout
                | russh::Error::SendError => true,
                russh::Error::IO(io_err) => is_io_connection_loss(io_err),
                _ => false,
            };
        }
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(is_io_connection_loss)
    })
}

fn is_io_connection_loss(err: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        err.kind(),
        ConnectionReset
            | ConnectionAborted
            | ConnectionRefused
            | NotConnected
            | HostUnreachable
            | NetworkUnreachable
            | BrokenPipe
            | UnexpectedEof
            | TimedOut
    )
}

fn is_sftp_missing_path(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let Some(sftp_error) = cause.downcast_ref::<russh_sftp::client::error::Error>() else {
            return false;
        };
        matches!(
            sftp_error,
            russh_sftp::client::error::Error::Status(status)
                if status.status_code == russh_sftp::protocol::StatusCode::NoSuchFile
        )
    })
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    let (kind, code) = if has_cause::<AuthenticationFailure>(&err) {
        (AppErrorKind::Authentication, codes::AUTHENTICATION_FAILURE)
    } else if has_cause::<AuthenticationTimeout>(&err) {
        (AppErrorKind::Connectivity, codes::AUTHENTICATION_TIMEOUT)
    } else {
        (AppErrorKind::Connectivity, codes::CONNECTION_FAILURE)
    };
    AppError::with_message(kind, code, format!("ssh connect failed: {err:#}"))
}

/// Every operation reconnects lazily, so a failed reconnect surfaces here and has to
/// classify the same way it does when the session is first opened.
fn map_exec_error(err: anyhow::Error) -> AppError {
    if has_cause::<AuthenticationFailure>(&err)
        || has_cause::<AuthenticationTimeout>(&err)
        || has_cause::<ConnectFailure>(&err)
    {
        return map_connect_error(err);
    }
    if is_connection_loss(&err) {
        return AppError::with_message(
            AppErrorKind::Connectivity,
            codes::CONNECTION_RESET,
            format!("ssh connection lost: {err:#}"),
        );
    }
    AppError::with_message(
        AppErrorKind::RemoteOperation,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err:#}"),
    )
}

fn map_transfer_error(err: anyhow::Error, remote_path: &str) -> AppError {
    if is_sftp_missing_path(&err) {
        return AppError::with_message(
            AppErrorKind::NotFound,
            codes::NOT_FOUND,
            format!("remote path not found: {remote_path}"),
        );
    }
    map_exec_error(err).with_context(remote_path.to_string())
}

/// Remote execution and SFTP over one managed SSH connection.
#[derive(Clone)]
pub struct SshAdapter {
    session: Arc<SessionManager>,
}

impl SshAdapter {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    fn host(&self) -> &str {
        &self.session.params().host
    }

    fn user(&self) -> &str {
        &self.session.params().username
    }
}

#[async_trait]
impl RemoteExecPort for SshAdapter {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "exec_capture", host = %self.host(), user = %self.user())
    )]
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let (stdout, stderr, exit_code) = self
            .session
            .exec_capture(command)
            .await
            .map_err(map_exec_error)?;
        Ok(ExecCapture {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn close(&self) -> AppResult<()> {
        self.session.shutdown().await;
        Ok(())
    }
}

#[async_trait]
impl FileTransferPort for SshAdapter {
    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, local_path),
        fields(op = "upload", host = %self.host(), user = %self.user())
    )]
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<u64> {
        self.session
            .upload_file(local_path, remote_path)
            .await
            .map_err(|err| map_transfer_error(err, remote_path))
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, local_path, progress),
        fields(op = "download", host = %self.host(), user = %self.user())
    )]
    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<&dyn TransferProgress>,
    ) -> AppResult<u64> {
        self.session
            .download_file(remote_path, local_path, progress)
            .await
            .map_err(|err| map_transfer_error(err, remote_path))
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self),
        fields(op = "list_dir", host = %self.host(), user = %self.user())
    )]
    async fn list_dir(&self, remote_dir: &str) -> AppResult<Vec<String>> {
        self.session
            .list_dir(remote_dir)
            .await
            .map_err(|err| map_transfer_error(err, remote_dir))
    }
}

/// Opens [`SshAdapter`] connections.
#[derive(Clone, Debug)]
pub struct SshConnector {
    pub keepalive_secs: u64,
    pub auth_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

#[async_trait]
impl ConnectorPort for SshConnector {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, target),
        fields(op = "connect", host = %target.host, user = %target.username, port = target.port)
    )]
    async fn connect(&self, target: &ConnectTarget) -> AppResult<Connection> {
        if target.host.trim().is_empty() {
            return Err(AppError::invalid_argument("no cluster host configured"));
        }
        if target.username.trim().is_empty() {
            return Err(AppError::invalid_argument("no username configured"));
        }
        let addr = network::resolve_host_addr(&target.host, target.port).await?;
        let session = Arc::new(SessionManager::new(SshParams {
            host: target.host.clone(),
            addr,
            username: target.username.clone(),
            credential: target.credential.clone(),
            known_hosts_path: target.known_hosts_path.clone(),
            keepalive_secs: self.keepalive_secs,
            auth_timeout: self.auth_timeout,
        }));
        session.ensure_connected().await.map_err(map_connect_error)?;
        let adapter = Arc::new(SshAdapter::new(session));
        Ok(Connection {
            exec: adapter.clone(),
            files: adapter,
        })
    }
}
