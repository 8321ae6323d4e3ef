// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::app::settings::{
    DEFAULT_MODEL_EXTENSION, DEFAULT_RESULT_EXTENSIONS, DEFAULT_SUBMIT_CMD, SessionSettings,
};
use crate::app::types::{ConnectTarget, Credential};

const APP_DIR_NAME: &str = "aview-hpc";
const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_ENV_VAR: &str = "AVIEW_HPC_CONFIG_PATH";
const PASSWORD_ENV_VAR: &str = "AVIEW_HPC_PASSWORD";
const PASSPHRASE_ENV_VAR: &str = "AVIEW_HPC_KEY_PASSPHRASE";
const DEFAULT_PORT: u16 = 22;

/// On-disk shape of `config.toml`. Every field is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_hosts_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_tempdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_extensions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

impl FileConfig {
    /// Fields set in `other` replace ours.
    pub fn merge(&mut self, other: FileConfig) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            host,
            username,
            port,
            identity_file,
            known_hosts_file,
            remote_tempdir,
            submit_cmd,
            model_extension,
            result_extensions,
            verbose
        );
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: Option<String>,
    pub username: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub known_hosts_file: Option<PathBuf>,
    pub remote_tempdir: Option<String>,
    pub submit_cmd: String,
    pub model_extension: String,
    pub result_extensions: Vec<String>,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Override,
    Env,
    #[serde(rename = "config")]
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub host: ConfigValue<Option<String>>,
    pub username: ConfigValue<Option<String>>,
    pub port: ConfigValue<u16>,
    pub identity_file: ConfigValue<Option<PathBuf>>,
    pub known_hosts_file: ConfigValue<Option<PathBuf>>,
    pub remote_tempdir: ConfigValue<Option<String>>,
    pub submit_cmd: ConfigValue<String>,
    pub model_extension: ConfigValue<String>,
    pub result_extensions: ConfigValue<Vec<String>>,
    pub verbose: ConfigValue<bool>,
}

impl ConfigReport {
    pub fn log(&self) {
        match (&self.config_path, self.config_path_source) {
            (Some(path), Some(source)) => log::debug!(
                "config file {} ({}, present: {})",
                path.display(),
                source.as_str(),
                self.config_file_present
            ),
            _ => log::debug!("no config file location could be resolved"),
        }
        log::debug!(
            "host={:?} ({}) username={:?} ({}) port={} ({})",
            self.host.value,
            self.host.source.as_str(),
            self.username.value,
            self.username.source.as_str(),
            self.port.value,
            self.port.source.as_str()
        );
        log::debug!(
            "submit_cmd={} ({}) remote_tempdir={:?} ({}) result_extensions={:?} ({})",
            self.submit_cmd.value,
            self.submit_cmd.source.as_str(),
            self.remote_tempdir.value,
            self.remote_tempdir.source.as_str(),
            self.result_extensions.value,
            self.result_extensions.source.as_str()
        );
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub username: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
    pub verbose: Option<bool>,
}

fn pick<T>(over: Option<T>, file: Option<T>, default: T) -> (T, ConfigSource) {
    match (over, file) {
        (Some(value), _) => (value, ConfigSource::Override),
        (None, Some(value)) => (value, ConfigSource::ConfigFile),
        (None, None) => (default, ConfigSource::Default),
    }
}

fn pick_opt<T>(over: Option<T>, file: Option<T>) -> (Option<T>, ConfigSource) {
    match (over, file) {
        (Some(value), _) => (Some(value), ConfigSource::Override),
        (None, Some(value)) => (Some(value), ConfigSource::ConfigFile),
        (None, None) => (None, ConfigSource::Default),
    }
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = resolve_config_path(config_path_override)?;
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let (host, host_source) = pick_opt(overrides.host, file_config.host);
    let (username, username_source) = match pick_opt(overrides.username, file_config.username) {
        (None, _) => match login_name_from_env() {
            Some(name) => (Some(name), ConfigSource::Env),
            None => (None, ConfigSource::Default),
        },
        picked => picked,
    };
    let (port, port_source) = pick(overrides.port, file_config.port, DEFAULT_PORT);
    if port == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let (identity_file, identity_source) = pick_opt(
        overrides.identity_file.map(expand_path),
        file_config
            .identity_file
            .map(|raw| resolve_path(&raw, base_dir)),
    );
    let (known_hosts_file, known_hosts_source) = pick_opt(
        None,
        file_config
            .known_hosts_file
            .map(|raw| resolve_path(&raw, base_dir)),
    );
    let (remote_tempdir, tempdir_source) = pick_opt(None, file_config.remote_tempdir);
    let (submit_cmd, submit_source) =
        pick(None, file_config.submit_cmd, DEFAULT_SUBMIT_CMD.to_string());
    if submit_cmd.trim().is_empty() {
        anyhow::bail!("submit_cmd must not be empty");
    }
    let (model_extension, model_source) = pick(
        None,
        file_config.model_extension,
        DEFAULT_MODEL_EXTENSION.to_string(),
    );
    let (result_extensions, results_source) = pick(
        None,
        file_config.result_extensions,
        DEFAULT_RESULT_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
    );
    let (verbose, verbose_source) = pick(overrides.verbose, file_config.verbose, false);

    let config = Config {
        host,
        username,
        port,
        identity_file,
        known_hosts_file,
        remote_tempdir,
        submit_cmd,
        model_extension,
        result_extensions,
        verbose,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        host: ConfigValue {
            value: config.host.clone(),
            source: host_source,
        },
        username: ConfigValue {
            value: config.username.clone(),
            source: username_source,
        },
        port: ConfigValue {
            value: config.port,
            source: port_source,
        },
        identity_file: ConfigValue {
            value: config.identity_file.clone(),
            source: identity_source,
        },
        known_hosts_file: ConfigValue {
            value: config.known_hosts_file.clone(),
            source: known_hosts_source,
        },
        remote_tempdir: ConfigValue {
            value: config.remote_tempdir.clone(),
            source: tempdir_source,
        },
        submit_cmd: ConfigValue {
            value: config.submit_cmd.clone(),
            source: submit_source,
        },
        model_extension: ConfigValue {
            value: config.model_extension.clone(),
            source: model_source,
        },
        result_extensions: ConfigValue {
            value: config.result_extensions.clone(),
            source: results_source,
        },
        verbose: ConfigValue {
            value: config.verbose,
            source: verbose_source,
        },
    };

    Ok(LoadResult { config, report })
}

impl Config {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            submit_cmd: self.submit_cmd.clone(),
            remote_tempdir: self.remote_tempdir.clone(),
            model_extension: self.model_extension.clone(),
            result_extensions: self.result_extensions.clone(),
            ..SessionSettings::default()
        }
    }

    /// Connection target with credentials. `password` usually comes from
    /// [`password_from_env`].
    pub fn connect_target(&self, password: Option<String>) -> Result<ConnectTarget> {
        let host = self
            .host
            .clone()
            .filter(|host| !host.trim().is_empty())
            .context("no cluster host configured; pass --host or run `aview-hpc config set --host <host>`")?;
        let username = self
            .username
            .clone()
            .filter(|name| !name.trim().is_empty())
            .context("no username configured; pass --username or set username in the config file")?;
        let credential = match &self.identity_file {
            Some(path) => Credential::IdentityFile {
                path: path.clone(),
                passphrase: std::env::var(PASSPHRASE_ENV_VAR).ok(),
                password,
            },
            None => Credential::Password(password.with_context(|| {
                format!("no credentials: set {PASSWORD_ENV_VAR} or configure identity_file")
            })?),
        };
        Ok(ConnectTarget {
            host,
            port: self.port,
            username,
            credential,
            known_hosts_path: self.known_hosts_file.clone(),
        })
    }
}

pub fn password_from_env() -> Option<String> {
    std::env::var(PASSWORD_ENV_VAR)
        .ok()
        .filter(|value| !value.is_empty())
}

fn login_name_from_env() -> Option<String> {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok())
        .filter(|name| !name.is_empty())
}

/// Merges `update` into the config file at the resolved location, creating it if needed.
/// Returns the path written.
pub fn save_fields(config_path_override: Option<PathBuf>, update: FileConfig) -> Result<PathBuf> {
    let (config_path, _, _) = resolve_config_path(config_path_override)?;
    let path = config_path.context("failed to resolve config file location")?;
    let mut current = read_config_file(&path, false)?;
    current.merge(update);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let contents = toml::to_string_pretty(&current).context("failed to encode config")?;
    fs::write(&path, contents)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(path)
}

fn resolve_config_path(
    config_path_override: Option<PathBuf>,
) -> Result<(Option<PathBuf>, Option<ConfigSource>, bool)> {
    Ok(match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
