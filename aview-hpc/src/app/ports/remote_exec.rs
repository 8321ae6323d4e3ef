// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[derive(Debug, Clone, Default)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecCapture {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Whitespace-only stderr counts as empty.
    pub fn has_stderr(&self) -> bool {
        self.stderr.iter().any(|b| !b.is_ascii_whitespace())
    }
}

#[async_trait]
/// Remote command execution over an authenticated session.
/// Commands run one at a time; stderr is returned, never raised.
pub trait RemoteExecPort: Send + Sync {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture>;

    /// Tears down the connection. Calls in flight fail with a connectivity error.
    async fn close(&self) -> AppResult<()>;
}
