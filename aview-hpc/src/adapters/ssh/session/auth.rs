// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::client::{AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;

use crate::adapters::ssh::error::{AuthenticationFailure, AuthenticationTimeout, ConnectFailure};
use crate::app::types::Credential;

use super::{ClientHandler, KnownHosts, SessionManager};

/// Bound on keyboard-interactive rounds; servers asking more than this are looping.
const MAX_KI_ROUNDS: usize = 8;

enum AuthDecision {
    Success,
    KeyboardInteractive,
    Failure,
}

fn auth_decision(result: AuthResult) -> AuthDecision {
    match result {
        AuthResult::Success => AuthDecision::Success,
        AuthResult::Failure {
            remaining_methods, ..
        } if remaining_methods.contains(&russh::MethodKind::KeyboardInteractive) => {
            AuthDecision::KeyboardInteractive
        }
        AuthResult::Failure { .. } => AuthDecision::Failure,
    }
}

impl SessionManager {
    /// Connects and authenticates unless a live handle already exists.
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut handle_field = self.handle.lock().await;
        let needs_connect = match handle_field.as_ref() {
            None => true,
            Some(h) => h.is_closed(),
        };
        if !needs_connect {
            return Ok(());
        }

        log::info!(
            "establishing connection with {}@{}",
            &self.params.username,
            &self.params.addr
        );
        let limit = self.params.auth_timeout;
        let addr = self.params.addr;
        let handle = tokio::time::timeout(limit, self.connect_and_authenticate())
            .await
            .map_err(|_| AuthenticationTimeout(limit))?
            .map_err(|err| {
                if err.is::<AuthenticationFailure>() {
                    err
                } else {
                    anyhow::Error::new(ConnectFailure {
                        addr,
                        source: err.into(),
                    })
                }
            })?;
        *handle_field = Some(handle);
        drop(handle_field);

        self.start_keepalive().await;
        Ok(())
    }

    async fn connect_and_authenticate(&self) -> Result<russh::client::Handle<ClientHandler>> {
        let handler = ClientHandler {
            host: self.params.host.clone(),
            addr: self.params.addr,
            known_hosts: KnownHosts {
                path: self.params.known_hosts_path.clone(),
            },
        };
        let mut handle = russh::client::connect(self.config.clone(), self.params.addr, handler)
            .await
            .context("SSH connect failed")?;
        log::debug!(
            "transport established with {}, authenticating as {}",
            &self.params.addr,
            &self.params.username
        );

        let username = self.params.username.clone();
        let (result, ki_password) = match &self.params.credential {
            Credential::Password(password) => {
                let result = handle
                    .authenticate_password(username, password.clone())
                    .await?;
                (result, Some(password.as_str()))
            }
            Credential::IdentityFile {
                path,
                passphrase,
                password,
            } => {
                let key = russh::keys::load_secret_key(path, passphrase.as_deref())
                    .with_context(|| format!("failed to load secret key at {}", path.display()))?;
                // SHA-256 for RSA keys when the server supports it; ignored otherwise
                let key = PrivateKeyWithHashAlg::new(
                    Arc::new(key),
                    handle.best_supported_rsa_hash().await?.flatten(),
                );
                let result = handle.authenticate_publickey(username, key).await?;
                (result, password.as_deref())
            }
        };

        match auth_decision(result) {
            AuthDecision::Success => {}
            AuthDecision::KeyboardInteractive => match ki_password {
                Some(password) => self.keyboard_interactive(&mut handle, password).await?,
                None => return Err(AuthenticationFailure.into()),
            },
            AuthDecision::Failure => return Err(AuthenticationFailure.into()),
        }
        log::info!("authenticated as {}", &self.params.username);
        Ok(handle)
    }

    /// Answers every keyboard-interactive prompt with the account password.
    async fn keyboard_interactive(
        &self,
        handle: &mut russh::client::Handle<ClientHandler>,
        password: &str,
    ) -> Result<()> {
        let mut response = handle
            .authenticate_keyboard_interactive_start(self.params.username.clone(), None)
            .await
            .context("keyboard-interactive start failed")?;

        for _ in 0..MAX_KI_ROUNDS {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(()),
                KeyboardInteractiveAuthResponse::Failure {
                    remaining_methods,
                    partial_success,
                } => {
                    log::debug!(
                        "keyboard-interactive failed (partial_success={partial_success}, remaining={remaining_methods:?})"
                    );
                    return Err(AuthenticationFailure.into());
                }
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    let answers = prompts.iter().map(|_| password.to_string()).collect();
                    response = handle
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .context("keyboard-interactive respond failed")?;
                }
            }
        }
        Err(AuthenticationFailure.into())
    }

    async fn start_keepalive(&self) {
        let Some(interval) = self.config.keepalive_interval else {
            return;
        };
        let handle_clone = self.handle.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval / 2);
            loop {
                ticker.tick().await;
                let guard = handle_clone.lock().await;
                let Some(handle) = guard.as_ref() else {
                    continue;
                };
                if handle.is_closed() {
                    log::debug!("keepalive handle is closed");
                    break;
                }
                if let Err(e) = handle.send_keepalive(true).await {
                    log::debug!("error when sending a keepalive: {e}");
                }
            }
        });
        if let Some(previous) = self.keepalive_task_handle.lock().await.replace(task) {
            previous.abort();
        }
    }
}
