// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::ports::{FileTransferPort, RemoteExecPort};
use crate::app::types::ConnectTarget;

/// An authenticated channel split into its command and transfer halves.
#[derive(Clone)]
pub struct Connection {
    pub exec: Arc<dyn RemoteExecPort>,
    pub files: Arc<dyn FileTransferPort>,
}

#[async_trait]
/// Opens authenticated connections.
/// Authentication timeouts must use the `authentication_timeout` code so callers can retry them.
pub trait ConnectorPort: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> AppResult<Connection>;
}
