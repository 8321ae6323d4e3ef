// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(
    name = "aview-hpc",
    version,
    about,
    long_about = None,
    after_help = "Submit Adams jobs to a SLURM cluster and track them.\n\
\n\
Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < AVIEW_HPC_CONFIG_PATH < --config.\n\
The SSH password is read from AVIEW_HPC_PASSWORD; a key passphrase from AVIEW_HPC_KEY_PASSPHRASE.\n\
Results are printed as JSON on stdout; logs go to stderr."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, AVIEW_HPC_CONFIG_PATH is used if set, otherwise the default config file location."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[arg(
        short = 'H',
        long,
        global = true,
        value_name = "HOST",
        help = "Cluster login node. Overrides `host` from the config file."
    )]
    pub host: Option<String>,
    #[arg(
        short,
        long,
        global = true,
        value_name = "USER",
        help = "Login name on the cluster. Overrides `username` from the config file."
    )]
    pub username: Option<String>,
    #[arg(
        long,
        global = true,
        value_name = "PORT",
        help = "SSH port. Overrides `port` from the config file."
    )]
    pub port: Option<u16>,
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Private key to authenticate with instead of a password. Overrides `identity_file` from the config file."
    )]
    pub identity_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

impl Opts {
    pub fn overrides(&self, verbose_override: Option<bool>) -> Overrides {
        Overrides {
            host: self.host.clone(),
            username: self.username.clone(),
            port: self.port,
            identity_file: self.identity_file.clone(),
            verbose: verbose_override,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a control file with its model and submit it as one job.
    Submit(SubmitArgs),
    /// Submit every job listed in a JSON batch file.
    SubmitMulti(SubmitMultiArgs),
    /// Download result files from a job directory.
    GetResults(GetResultsArgs),
    /// List the files of a job directory with their metadata.
    DirStatus(RemoteDirArgs),
    /// Show the newest result file of a job directory.
    LastUpdate(RemoteDirArgs),
    /// Show the user's recent jobs from SLURM accounting.
    JobTable(JobTableArgs),
    /// Print the solver message file of a job directory.
    JobMessages(RemoteDirArgs),
    /// Submit the control file already in a job directory again.
    Resubmit(RemoteDirArgs),
    /// Show which model a control file references and its thread count, without connecting.
    Inspect(InspectArgs),
    /// Show or change the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[arg(value_name = "CONTROL_FILE", help = "The .acf control file to submit")]
    pub control_file: PathBuf,
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Model file to upload. Defaults to the model the control file references."
    )]
    pub model_file: Option<PathBuf>,
    #[arg(
        short,
        long = "aux-file",
        value_name = "PATH",
        num_args = 1..,
        help = "Additional input files to upload next to the model"
    )]
    pub aux_files: Vec<PathBuf>,
    #[arg(
        short = 'M',
        long,
        value_name = "N",
        help = "Wait until fewer than N of your jobs are running before submitting"
    )]
    pub max_user_jobs: Option<usize>,
    #[arg(
        short,
        long = "option",
        value_name = "NAME=VALUE",
        value_parser = parse_submit_option,
        help = "Extra option for the submit command, passed as `--NAME VALUE`. Repeatable."
    )]
    pub options: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct SubmitMultiArgs {
    #[arg(
        value_name = "BATCH_FILE",
        help = "JSON file with `acf_file`, `adm_file` and `aux_files` lists"
    )]
    pub batch_file: PathBuf,
    #[arg(
        short = 'M',
        long,
        value_name = "N",
        help = "Wait until fewer than N of your jobs are running before each submission"
    )]
    pub max_user_jobs: Option<usize>,
    #[arg(
        short,
        long = "option",
        value_name = "NAME=VALUE",
        value_parser = parse_submit_option,
        help = "Extra option for the submit command of every job, passed as `--NAME VALUE`. Repeatable."
    )]
    pub options: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct GetResultsArgs {
    #[arg(value_name = "REMOTE_DIR", help = "Job directory on the cluster")]
    pub remote_dir: String,
    #[arg(value_name = "LOCAL_DIR", help = "Where to put the downloaded files")]
    pub local_dir: PathBuf,
    #[arg(
        short,
        long = "extension",
        value_name = "EXT",
        num_args = 1..,
        help = "Result extensions to fetch (e.g. .res). Defaults to `result_extensions` from the config file."
    )]
    pub extensions: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RemoteDirArgs {
    #[arg(value_name = "REMOTE_DIR", help = "Job directory on the cluster")]
    pub remote_dir: String,
}

#[derive(Args, Debug)]
pub struct JobTableArgs {
    #[arg(
        short,
        long,
        value_name = "DAYS",
        help = "How far back to look. Defaults to 7 days."
    )]
    pub days: Option<u32>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(value_name = "CONTROL_FILE", help = "The .acf control file to inspect")]
    pub control_file: PathBuf,
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Model file to read instead of the referenced one"
    )]
    pub model_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print resolved configuration values and where each came from.
    Show,
    /// Write the given values (including --host, --username, --port and --identity-file)
    /// into the config file, keeping the others.
    Set(ConfigSetArgs),
}

/// Values for `config set`. Host, username, port and identity file come from the global
/// flags of the same name.
#[derive(Args, Debug, Default)]
pub struct ConfigSetArgs {
    #[arg(long, value_name = "PATH", help = "known_hosts file used to pin the host key")]
    pub known_hosts_file: Option<String>,
    #[arg(
        long,
        value_name = "DIR",
        help = "Cluster directory under which job directories are created"
    )]
    pub remote_tempdir: Option<String>,
    #[arg(long, value_name = "CMD", help = "Submit command on the cluster")]
    pub submit_cmd: Option<String>,
    #[arg(long, value_name = "EXT", help = "Extension added to extension-less model references")]
    pub model_extension: Option<String>,
    #[arg(
        long = "result-extension",
        value_name = "EXT",
        num_args = 1..,
        help = "Default result extensions for get-results"
    )]
    pub result_extensions: Vec<String>,
}

fn parse_submit_option(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim().trim_start_matches("--");
    if name.is_empty() {
        return Err(format!("missing option name in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

const HELP_TEMPLATE: &str = r#"              _                    _
  __ ___   _(_) _____      __    | |__  _ __   ___
 / _` \ \ / / |/ _ \ \ /\ / /____| '_ \| '_ \ / __|
| (_| |\ V /| |  __/\ V  V /_____| | | | |_) | (__
 \__,_| \_/ |_|\___| \_/\_/      |_| |_| .__/ \___|
                                       |_|

{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
"#;

fn apply_help_template_recursively(cmd: &mut clap::Command) {
    let mut owned = std::mem::take(cmd);
    owned = owned.help_template(HELP_TEMPLATE);
    for sub in owned.get_subcommands_mut() {
        apply_help_template_recursively(sub);
    }
    *cmd = owned;
}

pub fn cli_command() -> clap::Command {
    let mut cmd = Opts::command();
    apply_help_template_recursively(&mut cmd);
    cmd
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let verbose_override = opts.verbose.then_some(true);
    ParsedOpts {
        opts,
        verbose_override,
    }
}
