// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod connector;
pub mod file_transfer;
pub mod remote_exec;

pub use clock::ClockPort;
pub use connector::{Connection, ConnectorPort};
pub use file_transfer::{FileTransferPort, TransferProgress};
pub use remote_exec::{ExecCapture, RemoteExecPort};
