// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::SocketAddr;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};

mod net;

pub use net::NetError;

fn map_net_error(err: NetError) -> AppError {
    match err {
        NetError::DnsNotFound(host) | NetError::NoAddrs(host) => AppError::with_message(
            AppErrorKind::Connectivity,
            codes::DNS_NOT_FOUND,
            format!(
                "could not resolve {host}; are you connected to the required VPN or private network?"
            ),
        ),
        NetError::Resolve(err) => AppError::with_message(
            AppErrorKind::Connectivity,
            codes::NETWORK_ERROR,
            format!("host lookup failed: {err}"),
        ),
    }
}

/// First socket address for `host:port`.
pub async fn resolve_host_addr(host: &str, port: u16) -> AppResult<SocketAddr> {
    net::lookup_first_addr(host, port)
        .await
        .map_err(map_net_error)
}
