// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, bail};
use russh::client::Config;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use russh::keys::ssh_key::PublicKey;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::app::types::Credential;

mod auth;
mod exec;
mod sftp;

#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts: KnownHosts,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        self.known_hosts.accept(&self.host, self.addr, server_public_key)
    }
}

/// Parameters for establishing the SSH connection.
#[derive(Clone, Debug)]
pub struct SshParams {
    /// Hostname as typed by the user, used for known_hosts lookup.
    pub host: String,
    pub addr: SocketAddr,
    pub username: String,
    pub credential: Credential,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: u64,
    /// Upper bound for TCP connect, key exchange and authentication together.
    pub auth_timeout: Duration,
}

/// Names a server key may be filed under: the configured host, then its IP if different.
fn lookup_names(host: &str, addr: SocketAddr) -> Vec<String> {
    let ip = addr.ip().to_string();
    if ip == host {
        vec![ip]
    } else {
        vec![host.to_string(), ip]
    }
}

/// The user's known_hosts file, or an explicit one from the config.
#[derive(Clone, Debug)]
struct KnownHosts {
    path: Option<PathBuf>,
}

impl KnownHosts {
    fn lookup(&self, name: &str, port: u16, key: &PublicKey) -> Result<bool, russh::keys::Error> {
        match &self.path {
            Some(path) => russh::keys::check_known_hosts_path(name, port, key, path),
            None => russh::keys::check_known_hosts(name, port, key),
        }
    }

    fn record(&self, name: &str, port: u16, key: &PublicKey) -> Result<(), russh::keys::Error> {
        match &self.path {
            Some(path) => learn_known_hosts_path(name, port, key, path),
            None => learn_known_hosts(name, port, key),
        }
    }

    /// Trust on first use: a stored matching key passes, an unseen host is recorded,
    /// and a key that contradicts a stored entry fails the handshake.
    fn accept(&self, host: &str, addr: SocketAddr, key: &PublicKey) -> anyhow::Result<bool> {
        let port = addr.port();
        let names = lookup_names(host, addr);
        for name in &names {
            match self.lookup(name, port, key) {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(err) => {
                    log::warn!("host key of {name}:{port} does not match known_hosts: {err}");
                    bail!("host key check for {name}:{port} failed: {err}");
                }
            }
        }
        log::info!(
            "no known_hosts entry for {} on port {port}; recording the offered key",
            names.join(" or ")
        );
        self.record(host, port, key)
            .with_context(|| format!("could not record host key of {host}:{port}"))?;
        Ok(true)
    }
}

fn client_config(keepalive_secs: u64) -> Config {
    Config {
        inactivity_timeout: Some(Duration::from_secs(300)),
        keepalive_interval: Some(Duration::from_secs(keepalive_secs)),
        channel_buffer_size: 64,
        window_size: 1024 * 1024,
        ..Default::default()
    }
}

/// Owns one SSH connection and re-establishes it when the server drops it.
pub struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    handle: Arc<Mutex<Option<russh::client::Handle<ClientHandler>>>>,
    keepalive_task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(params: SshParams) -> Self {
        Self {
            config: Arc::new(client_config(params.keepalive_secs)),
            params,
            handle: Arc::default(),
            keepalive_task_handle: Arc::default(),
        }
    }

    pub fn params(&self) -> &SshParams {
        &self.params
    }

    /// Stops keepalives and says goodbye to the server. Safe to call twice.
    pub async fn shutdown(&self) {
        if let Some(task) = self.keepalive_task_handle.lock().await.take() {
            task.abort();
        }
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        if let Err(err) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            log::debug!("disconnect from {} failed: {err}", self.params.addr);
        }
    }
}
