// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Handlers behind each subcommand. Remote commands open one session, run, and close it;
//! `inspect` and `config` stay local.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::adapters::cli::{Command, ConfigCommand, ConfigSetArgs, InspectArgs, Opts};
use crate::adapters::ssh::SshConnector;
use crate::adapters::time::SystemClock;
use crate::app::ports::{ClockPort, TransferProgress};
use crate::app::services::control_file;
use crate::app::session::HpcSession;
use crate::app::submission::model_path_for;
use crate::app::types::SubmissionRequest;
use crate::config::{self, Config, ConfigReport, FileConfig};

/// Logs download progress at debug level, and once per file at info when it completes.
struct LogProgress;

impl TransferProgress for LogProgress {
    fn on_progress(&self, path: &str, transferred: u64, total: Option<u64>) {
        match total {
            Some(total) if transferred >= total => {
                log::info!("fetched {path} ({total} bytes)");
            }
            Some(total) => log::debug!("{path}: {transferred}/{total} bytes"),
            None => log::debug!("{path}: {transferred} bytes"),
        }
    }
}

/// `submit-multi` input: parallel lists, one entry per job.
#[derive(Debug, Deserialize)]
struct BatchFile {
    acf_file: Vec<PathBuf>,
    #[serde(default)]
    adm_file: Vec<Option<PathBuf>>,
    #[serde(default)]
    aux_files: Vec<Vec<PathBuf>>,
}

impl BatchFile {
    /// Relative paths are taken from `base_dir`, the directory holding the batch file.
    /// `options` go to the submit command of every job.
    fn into_requests(
        self,
        base_dir: &Path,
        options: &[(String, String)],
    ) -> Result<Vec<SubmissionRequest>> {
        let jobs = self.acf_file.len();
        if jobs == 0 {
            bail!("batch file lists no control files");
        }
        if !self.adm_file.is_empty() && self.adm_file.len() != jobs {
            bail!(
                "batch file lists {jobs} control files but {} model files",
                self.adm_file.len()
            );
        }
        if !self.aux_files.is_empty() && self.aux_files.len() != jobs {
            bail!(
                "batch file lists {jobs} control files but {} auxiliary file lists",
                self.aux_files.len()
            );
        }
        let mut models = self.adm_file.into_iter();
        let mut aux = self.aux_files.into_iter();
        Ok(self
            .acf_file
            .into_iter()
            .map(|control| SubmissionRequest {
                control_file: base_dir.join(control),
                model_file: models.next().flatten().map(|model| base_dir.join(model)),
                aux_files: aux
                    .next()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|file| base_dir.join(file))
                    .collect(),
                options: options.to_vec(),
            })
            .collect())
    }
}

fn read_batch_file(path: &Path, options: &[(String, String)]) -> Result<Vec<SubmissionRequest>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let batch: BatchFile = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse batch file {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    batch.into_requests(base_dir, options)
}

#[derive(Debug, Serialize)]
struct Inspection {
    control_file: PathBuf,
    model_reference: Option<String>,
    model_file: PathBuf,
    model_found: bool,
    thread_count: Option<u32>,
}

fn inspect(args: &InspectArgs, model_extension: &str) -> Result<Inspection> {
    let text = std::fs::read_to_string(&args.control_file)
        .with_context(|| format!("failed to read {}", args.control_file.display()))?;
    let (model_reference, model_file) = match &args.model_file {
        Some(path) => (None, path.clone()),
        None => {
            let reference = control_file::resolve_model_reference(&text, model_extension)
                .with_context(|| format!("in {}", args.control_file.display()))?;
            let path = model_path_for(&args.control_file, &reference);
            (Some(reference), path)
        }
    };
    let thread_count = std::fs::read_to_string(&model_file)
        .ok()
        .map(|model| control_file::thread_count(&model));
    Ok(Inspection {
        control_file: args.control_file.clone(),
        model_reference,
        model_found: thread_count.is_some(),
        model_file,
        thread_count,
    })
}

fn config_update(opts: &Opts, args: &ConfigSetArgs) -> FileConfig {
    FileConfig {
        host: opts.host.clone(),
        username: opts.username.clone(),
        port: opts.port,
        identity_file: opts
            .identity_file
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned()),
        known_hosts_file: args.known_hosts_file.clone(),
        remote_tempdir: args.remote_tempdir.clone(),
        submit_cmd: args.submit_cmd.clone(),
        model_extension: args.model_extension.clone(),
        result_extensions: (!args.result_extensions.is_empty())
            .then(|| args.result_extensions.clone()),
        verbose: None,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}

async fn open_session(config: &Config) -> Result<HpcSession> {
    let target = config.connect_target(config::password_from_env())?;
    let connector = SshConnector::default();
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
    let session = HpcSession::open(&connector, clock, &target, config.session_settings()).await?;
    Ok(session)
}

async fn run_remote(session: &mut HpcSession, command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Submit(args) => {
            if let Some(limit) = args.max_user_jobs {
                session.wait_for_capacity(limit).await?;
            }
            let request = SubmissionRequest {
                control_file: args.control_file,
                model_file: args.model_file,
                aux_files: args.aux_files,
                options: args.options,
            };
            let result = session.submit(&request, false).await?;
            print_json(&result)
        }
        Command::SubmitMulti(args) => {
            let requests = read_batch_file(&args.batch_file, &args.options)?;
            let outcome = session.submit_all(&requests, args.max_user_jobs).await?;
            print_json(&outcome)
        }
        Command::GetResults(args) => {
            let extensions = if args.extensions.is_empty() {
                config.result_extensions.clone()
            } else {
                args.extensions
            };
            let progress: &dyn TransferProgress = &LogProgress;
            let files = session
                .get_results(&args.remote_dir, &args.local_dir, &extensions, Some(progress))
                .await?;
            print_json(&files)
        }
        Command::DirStatus(args) => print_json(&session.dir_status(&args.remote_dir).await?),
        Command::LastUpdate(args) => print_json(&session.last_update(&args.remote_dir).await?),
        Command::JobTable(args) => {
            let rows = match args.days {
                Some(days) => session.job_table_for(days).await?,
                None => session.job_table().await?,
            };
            print_json(&rows)
        }
        Command::JobMessages(args) => {
            let text = session.job_messages(&args.remote_dir).await?;
            println!("{text}");
            Ok(())
        }
        Command::Resubmit(args) => print_json(&session.resubmit(&args.remote_dir).await?),
        Command::Inspect(_) | Command::Config { .. } => {
            bail!("command does not need a cluster connection")
        }
    }
}

/// Runs the parsed command against the loaded configuration.
pub async fn run(opts: Opts, config: Config, report: ConfigReport) -> Result<()> {
    match &opts.command {
        Command::Config {
            action: ConfigCommand::Show,
        } => return print_json(&report),
        Command::Config {
            action: ConfigCommand::Set(args),
        } => {
            let path = config::save_fields(opts.config.clone(), config_update(&opts, args))?;
            log::info!("wrote {}", path.display());
            return print_json(&path);
        }
        Command::Inspect(args) => return print_json(&inspect(args, &config.model_extension)?),
        _ => {}
    }

    let mut session = open_session(&config).await?;
    let outcome = run_remote(&mut session, opts.command, &config).await;
    if let Err(err) = session.close().await {
        log::warn!("closing the connection failed: {err}");
    }
    outcome
}
