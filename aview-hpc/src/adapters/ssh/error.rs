// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
#[error("authentication_failure")]
pub struct AuthenticationFailure;

#[derive(Debug, ThisError)]
#[error("authentication did not finish within {0:?}")]
pub struct AuthenticationTimeout(pub std::time::Duration);

/// The connection went away while a request was in flight.
#[derive(Debug, ThisError)]
#[error("ssh session closed")]
pub struct SessionClosed;

/// A fresh connection could not be opened or authenticated for a reason other than
/// rejected credentials.
#[derive(Debug, ThisError)]
#[error("could not connect to {addr}")]
pub struct ConnectFailure {
    pub addr: std::net::SocketAddr,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}
