// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::ChannelMsg;

use crate::adapters::ssh::error::SessionClosed;

use super::SessionManager;

/// Folds one channel message into the captured streams. Returns true once the channel
/// is closed.
fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut i32,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = *exit_status as i32;
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

impl SessionManager {
    /// Runs `cmd` to completion, returning stdout, stderr and the exit code.
    pub async fn exec_capture(&self, cmd: &str) -> Result<(Vec<u8>, Vec<u8>, i32)> {
        self.ensure_connected().await?;
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(SessionClosed)?;
        let mut chan = handle
            .channel_open_session()
            .await
            .context("open session channel")?;
        log::debug!("executing '{cmd}'");
        chan.exec(true, cmd).await.context("exec request")?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code: i32 = 0;
        let mut closed = false;
        while let Some(msg) = chan.wait().await {
            if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                closed = true;
                break;
            }
        }
        let _ = chan.close().await;
        if !closed && handle.is_closed() {
            return Err(SessionClosed.into());
        }
        Ok((out, err, code))
    }
}
