// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Scripted fakes for the ports, shared by the app-layer tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    ClockPort, Connection, ConnectorPort, ExecCapture, FileTransferPort, RemoteExecPort,
    TransferProgress,
};
use crate::app::types::ConnectTarget;

pub fn ok_capture(stdout: &str) -> AppResult<ExecCapture> {
    Ok(ExecCapture {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_code: 0,
    })
}

pub fn stderr_capture(stdout: &str, stderr: &str) -> AppResult<ExecCapture> {
    Ok(ExecCapture {
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
        exit_code: 1,
    })
}

pub fn connection_reset() -> AppError {
    AppError::with_message(
        AppErrorKind::Connectivity,
        codes::CONNECTION_RESET,
        "connection reset by peer",
    )
}

/// Remote host that expects an exact sequence of commands and records file traffic.
#[derive(Default)]
pub struct ScriptedRemote {
    captures: Mutex<VecDeque<(String, AppResult<ExecCapture>)>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    listings: Mutex<HashMap<String, Vec<String>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    downloads: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl ScriptedRemote {
    pub fn new(captures: Vec<(String, AppResult<ExecCapture>)>) -> Self {
        Self {
            captures: Mutex::new(VecDeque::from(captures)),
            ..Default::default()
        }
    }

    pub fn push(&self, command: impl Into<String>, result: AppResult<ExecCapture>) {
        self.captures
            .lock()
            .expect("captures lock")
            .push_back((command.into(), result));
    }

    pub fn with_listing(self, dir: &str, names: &[&str]) -> Self {
        self.listings.lock().expect("listings lock").insert(
            dir.to_string(),
            names.iter().map(|name| name.to_string()).collect(),
        );
        self
    }

    pub fn with_file(self, remote_path: &str, content: &str) -> Self {
        self.files
            .lock()
            .expect("files lock")
            .insert(remote_path.to_string(), content.as_bytes().to_vec());
        self
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().expect("uploads lock").clone()
    }

    pub fn uploaded_text(&self, remote_path: &str) -> Option<String> {
        self.uploads()
            .into_iter()
            .find(|(path, _)| path == remote_path)
            .map(|(_, bytes)| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().expect("downloads lock").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn assert_drained(&self) {
        let left = self.captures.lock().expect("captures lock");
        assert!(
            left.is_empty(),
            "expected commands never ran: {:?}",
            left.iter().map(|(cmd, _)| cmd).collect::<Vec<_>>()
        );
    }
}

#[async_trait]
impl RemoteExecPort for ScriptedRemote {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let mut captures = self.captures.lock().expect("captures lock");
        let Some((expected, result)) = captures.pop_front() else {
            panic!("unexpected command: {command}");
        };
        assert_eq!(command, expected);
        result
    }

    async fn close(&self) -> AppResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl FileTransferPort for ScriptedRemote {
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<u64> {
        let bytes = std::fs::read(local_path).expect("read staged upload");
        let len = bytes.len() as u64;
        self.uploads
            .lock()
            .expect("uploads lock")
            .push((remote_path.to_string(), bytes));
        Ok(len)
    }

    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<&dyn TransferProgress>,
    ) -> AppResult<u64> {
        let bytes = self
            .files
            .lock()
            .expect("files lock")
            .get(remote_path)
            .cloned()
            .ok_or_else(|| {
                AppError::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, "no such file")
                    .with_context(remote_path.to_string())
            })?;
        std::fs::write(local_path, &bytes).expect("write download");
        let len = bytes.len() as u64;
        if let Some(progress) = progress {
            progress.on_progress(remote_path, len, Some(len));
        }
        self.downloads
            .lock()
            .expect("downloads lock")
            .push(remote_path.to_string());
        Ok(len)
    }

    async fn list_dir(&self, remote_dir: &str) -> AppResult<Vec<String>> {
        self.listings
            .lock()
            .expect("listings lock")
            .get(remote_dir.trim_end_matches('/'))
            .cloned()
            .ok_or_else(|| {
                AppError::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, "no such directory")
                    .with_context(remote_dir.to_string())
            })
    }
}

/// Clock frozen at a fixed instant; sleeps return immediately and are recorded.
pub struct FakeClock {
    now: OffsetDateTime,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn at(now: OffsetDateTime) -> Self {
        Self {
            now,
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps lock").clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        // 2026-03-09 12:00 UTC
        Self::at(OffsetDateTime::from_unix_timestamp(1_773_057_600).expect("valid timestamp"))
    }
}

#[async_trait]
impl ClockPort for FakeClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.now
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeps lock").push(duration);
    }
}

/// Connector that replays a list of outcomes, handing out the same remote on success.
pub struct ScriptedConnector {
    remote: Arc<ScriptedRemote>,
    outcomes: Mutex<VecDeque<AppResult<()>>>,
    attempts: Mutex<u32>,
}

impl ScriptedConnector {
    pub fn new(remote: Arc<ScriptedRemote>, outcomes: Vec<AppResult<()>>) -> Self {
        Self {
            remote,
            outcomes: Mutex::new(VecDeque::from(outcomes)),
            attempts: Mutex::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().expect("attempts lock")
    }
}

#[async_trait]
impl ConnectorPort for ScriptedConnector {
    async fn connect(&self, _target: &ConnectTarget) -> AppResult<Connection> {
        *self.attempts.lock().expect("attempts lock") += 1;
        let outcome = self
            .outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or(Ok(()));
        outcome.map(|()| Connection {
            exec: self.remote.clone(),
            files: self.remote.clone(),
        })
    }
}
