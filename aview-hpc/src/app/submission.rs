// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::ExecCapture;
use crate::app::services::control_file::{self, ControlFileError};
use crate::app::services::remote_path;
use crate::app::services::shell::{sh_escape, sh_glob_in};
use crate::app::session::HpcSession;
use crate::app::types::{SubmissionRequest, SubmissionResult};

const REPLY_MARKER: &str = "submitted batch job";

/// Where a session is in the submit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    StagingInputs,
    RewritingReferences,
    Uploading,
    Invoking,
    ParsingResponse,
    Submitted,
    Failed,
}

impl SubmissionState {
    fn successor(self) -> Option<SubmissionState> {
        use SubmissionState::*;
        match self {
            Idle => Some(StagingInputs),
            StagingInputs => Some(RewritingReferences),
            RewritingReferences => Some(Uploading),
            Uploading => Some(Invoking),
            Invoking => Some(ParsingResponse),
            ParsingResponse => Some(Submitted),
            Submitted | Failed => None,
        }
    }

    /// Starts a new submission. Only an idle session may start one unless rebinding.
    pub fn begin(self, allow_rebind: bool) -> AppResult<SubmissionState> {
        match self {
            SubmissionState::Idle => Ok(SubmissionState::StagingInputs),
            _ if allow_rebind => Ok(SubmissionState::StagingInputs),
            other => Err(AppError::with_message(
                AppErrorKind::State,
                codes::ALREADY_SUBMITTED,
                format!("session already used for a submission (state: {other})"),
            )),
        }
    }

    /// Resubmission skips staging and upload: the inputs are already on the cluster.
    pub fn begin_resubmit(self) -> SubmissionState {
        SubmissionState::Invoking
    }

    /// Moves to `to`, which must be the next step or `Failed`.
    pub fn advance(self, to: SubmissionState) -> AppResult<SubmissionState> {
        if to == SubmissionState::Failed || self.successor() == Some(to) {
            return Ok(to);
        }
        Err(AppError::with_message(
            AppErrorKind::State,
            codes::INVALID_TRANSITION,
            format!("cannot move from {self} to {to}"),
        ))
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmissionState::Idle => "idle",
            SubmissionState::StagingInputs => "staging inputs",
            SubmissionState::RewritingReferences => "rewriting references",
            SubmissionState::Uploading => "uploading",
            SubmissionState::Invoking => "invoking",
            SubmissionState::ParsingResponse => "parsing response",
            SubmissionState::Submitted => "submitted",
            SubmissionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Job id from a `Submitted batch job <n>` reply anywhere in `stdout`.
pub fn parse_job_id(stdout: &str) -> Option<u64> {
    stdout.lines().find_map(|line| {
        let lower = line.to_ascii_lowercase();
        let idx = lower.find(REPLY_MARKER)?;
        let rest = &line[idx + REPLY_MARKER.len()..];
        let digits_at = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        if digits_at == 0 {
            return None;
        }
        let rest = &rest[digits_at..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..end].parse().ok()
    })
}

fn parse_reply(capture: &ExecCapture) -> AppResult<u64> {
    let stdout = capture.stdout_text();
    let stderr = capture.stderr_text();
    match parse_job_id(&stdout) {
        Some(job_id) if job_id > 0 && !capture.has_stderr() => Ok(job_id),
        _ => Err(AppError::with_message(
            AppErrorKind::ProtocolParse,
            codes::SUBMISSION_FAILED,
            "scheduler did not accept the job",
        )
        .with_context(format!(
            "stdout: {}; stderr: {}",
            stdout.trim(),
            stderr.trim()
        ))),
    }
}

fn control_file_error(err: ControlFileError, control_file: &Path) -> AppError {
    let code = match err {
        ControlFileError::NoModelReference => codes::NO_MODEL_REFERENCE,
        ControlFileError::MalformedControlFile => codes::MALFORMED_CONTROL_FILE,
    };
    AppError::with_message(AppErrorKind::InvalidArgument, code, err.to_string())
        .with_context(control_file.display().to_string())
}

fn local_io_error(action: &str, path: &Path, err: std::io::Error) -> AppError {
    let kind = if err.kind() == std::io::ErrorKind::NotFound {
        AppErrorKind::NotFound
    } else {
        AppErrorKind::Local
    };
    let code = if kind == AppErrorKind::NotFound {
        codes::NOT_FOUND
    } else {
        codes::LOCAL_ERROR
    };
    AppError::with_message(kind, code, format!("cannot {action} {}: {err}", path.display()))
}

fn validate_option_name(name: &str) -> AppResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::invalid_argument(format!(
            "invalid submit option name: {name:?}"
        )))
    }
}

/// Local model path for a reference read out of `control_path`. Relative references
/// are taken from the control file's directory.
pub fn model_path_for(control_path: &Path, reference: &str) -> PathBuf {
    let reference = PathBuf::from(reference);
    if reference.is_absolute() {
        reference
    } else {
        control_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(reference)
    }
}

/// A local input and its private staged copy.
struct StagedInput {
    local: PathBuf,
    staged: PathBuf,
}

impl HpcSession {
    fn step(&mut self, to: SubmissionState) -> AppResult<()> {
        self.state = self.state.advance(to)?;
        Ok(())
    }

    fn submit_command(&self, remote_control: &str, options: &[(String, String)]) -> String {
        let mut command = format!("{} {}", self.settings.submit_cmd, sh_escape(remote_control));
        for (name, value) in options {
            command.push_str(&format!(" --{name} {}", sh_escape(value)));
        }
        command
    }

    async fn invoke(&mut self, remote_control: &str, options: &[(String, String)]) -> AppResult<u64> {
        let command = self.submit_command(remote_control, options);
        log::debug!("running `{command}`");
        let capture = self.exec.exec_capture(&command).await?;
        self.step(SubmissionState::ParsingResponse)?;
        parse_reply(&capture)
    }

    fn bind(&mut self, result: &SubmissionResult) {
        log::info!(
            "submitted {} as job {} in {}",
            result.job_name,
            result.job_id,
            result.remote_dir
        );
        self.binding = Some(result.clone());
    }

    /// Stages, rewrites, uploads and submits one job, then binds the session to it.
    pub async fn submit(
        &mut self,
        request: &SubmissionRequest,
        allow_rebind: bool,
    ) -> AppResult<SubmissionResult> {
        self.state = self.state.begin(allow_rebind)?;
        match self.run_submission(request).await {
            Ok(result) => {
                self.step(SubmissionState::Submitted)?;
                self.bind(&result);
                Ok(result)
            }
            Err(err) => {
                self.state = SubmissionState::Failed;
                Err(err)
            }
        }
    }

    async fn run_submission(&mut self, request: &SubmissionRequest) -> AppResult<SubmissionResult> {
        for (name, _) in &request.options {
            validate_option_name(name)?;
        }
        let control_path = &request.control_file;
        let job_name = control_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                AppError::invalid_argument(format!(
                    "{} is not a control file path",
                    control_path.display()
                ))
            })?;
        let control_text = tokio::fs::read_to_string(control_path)
            .await
            .map_err(|err| local_io_error("read", control_path, err))?;

        let model_path = match &request.model_file {
            Some(path) => path.clone(),
            None => {
                let reference =
                    control_file::resolve_model_reference(&control_text, &self.settings.model_extension)
                        .map_err(|err| control_file_error(err, control_path))?;
                model_path_for(control_path, &reference)
            }
        };
        log::debug!("model file for {job_name}: {}", model_path.display());

        let staging = tempfile::Builder::new()
            .prefix("aview-hpc-")
            .tempdir()
            .map_err(|err| AppError::local(format!("cannot create staging directory: {err}")))?;
        let mut inputs = Vec::with_capacity(2 + request.aux_files.len());
        let mut names = HashSet::new();
        let sources = [control_path, &model_path]
            .into_iter()
            .chain(request.aux_files.iter());
        for local in sources {
            let name = remote_path::local_file_name(local).ok_or_else(|| {
                AppError::invalid_argument(format!("{} has no file name", local.display()))
            })?;
            if !names.insert(name.clone()) {
                return Err(AppError::invalid_argument(format!(
                    "two inputs are named {name}; the remote directory is flat"
                )));
            }
            let staged = staging.path().join(&name);
            tokio::fs::copy(local, &staged)
                .await
                .map_err(|err| local_io_error("stage", local, err))?;
            inputs.push(StagedInput {
                local: local.clone(),
                staged,
            });
        }

        self.step(SubmissionState::RewritingReferences)?;
        let rewritten = control_file::strip_model_directory(&control_text)
            .map_err(|err| control_file_error(err, control_path))?;
        tokio::fs::write(&inputs[0].staged, rewritten)
            .await
            .map_err(|err| local_io_error("write", &inputs[0].staged, err))?;

        self.step(SubmissionState::Uploading)?;
        let remote_dir = self.make_remote_dir(&job_name).await?;
        let mut remote_control = String::new();
        for input in &inputs {
            let (remote_file, _) = self
                .uploads
                .ensure_uploaded(
                    self.exec.as_ref(),
                    self.files.as_ref(),
                    &input.local,
                    &input.staged,
                    &remote_dir,
                )
                .await?;
            if remote_control.is_empty() {
                remote_control = remote_file;
            }
        }

        self.step(SubmissionState::Invoking)?;
        let job_id = self.invoke(&remote_control, &request.options).await?;
        Ok(SubmissionResult {
            remote_dir,
            job_name,
            job_id,
        })
    }

    /// Submits the control file already sitting in `remote_dir` again.
    ///
    /// Stale `*.slurm` wrapper scripts are removed first. Rebinding is always allowed.
    pub async fn resubmit(&mut self, remote_dir: &str) -> AppResult<SubmissionResult> {
        self.state = self.state.begin_resubmit();
        match self.run_resubmission(remote_dir).await {
            Ok(result) => {
                self.step(SubmissionState::Submitted)?;
                self.bind(&result);
                Ok(result)
            }
            Err(err) => {
                self.state = SubmissionState::Failed;
                Err(err)
            }
        }
    }

    async fn run_resubmission(&mut self, remote_dir: &str) -> AppResult<SubmissionResult> {
        let cleanup = format!("rm -f {}", sh_glob_in(remote_dir, "*.slurm"));
        self.run_clean(&cleanup).await?;

        let mut names = self.files.list_dir(remote_dir).await?;
        names.sort();
        let control = names
            .iter()
            .find(|name| remote_path::extension(name) == Some(".acf"))
            .ok_or_else(|| {
                AppError::with_message(
                    AppErrorKind::NotFound,
                    codes::NOT_FOUND,
                    format!("no control file (.acf) in {remote_dir}"),
                )
            })?;
        let remote_control = remote_path::join(remote_dir, control);
        let job_id = self.invoke(&remote_control, &[]).await?;
        Ok(SubmissionResult {
            remote_dir: remote_dir.trim_end_matches('/').to_string(),
            job_name: remote_path::stem(remote_dir).to_string(),
            job_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::Connection;
    use crate::app::settings::SessionSettings;
    use crate::app::test_support::{FakeClock, ScriptedRemote, ok_capture, stderr_capture};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        control: PathBuf,
        model: PathBuf,
    }

    /// `runs/test.acf` referencing `../models/test.adm`.
    fn fixture(control_text: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("runs")).unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        let control = dir.path().join("runs").join("test.acf");
        let model = dir.path().join("models").join("test.adm");
        std::fs::write(&control, control_text).unwrap();
        std::fs::write(&model, "adams_view_name='test'\n").unwrap();
        Fixture {
            _dir: dir,
            control,
            model,
        }
    }

    fn session(remote: &Arc<ScriptedRemote>) -> HpcSession {
        HpcSession::new(
            "login.cluster",
            "alice",
            Connection {
                exec: remote.clone(),
                files: remote.clone(),
            },
            Arc::new(FakeClock::default()),
            SessionSettings::default(),
        )
    }

    fn mkdir_commands(remote: &ScriptedRemote, dir: &str) {
        remote.push("mktemp -d 'test.XXXX'", ok_capture(&format!("{dir}\n")));
        remote.push(format!("chmod 775 '{dir}'"), ok_capture(""));
    }

    #[test]
    fn states_only_advance_in_order() {
        let state = SubmissionState::Idle.begin(false).unwrap();
        assert_eq!(state, SubmissionState::StagingInputs);
        let err = state.advance(SubmissionState::Invoking).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_TRANSITION);
        assert_eq!(
            state.advance(SubmissionState::Failed).unwrap(),
            SubmissionState::Failed
        );
        assert!(SubmissionState::Submitted
            .advance(SubmissionState::Idle)
            .is_err());
    }

    #[test]
    fn only_idle_sessions_begin_without_rebind() {
        for state in [SubmissionState::Submitted, SubmissionState::Failed] {
            let err = state.begin(false).unwrap_err();
            assert_eq!(err.kind(), AppErrorKind::State);
            assert_eq!(err.code(), codes::ALREADY_SUBMITTED);
            assert_eq!(state.begin(true).unwrap(), SubmissionState::StagingInputs);
        }
    }

    #[test]
    fn parses_scheduler_reply() {
        assert_eq!(parse_job_id("Submitted batch job 4242\n"), Some(4242));
        assert_eq!(
            parse_job_id("wrapper v2\nSUBMITTED BATCH JOB  17 on cluster main\n"),
            Some(17)
        );
        assert_eq!(parse_job_id("submitted batch job\n"), None);
        assert_eq!(parse_job_id("submitted batch jobs 4\n"), None);
        assert_eq!(parse_job_id("sbatch: error: invalid partition\n"), None);
    }

    #[tokio::test]
    async fn submit_uploads_rewritten_control_and_binds_job() {
        let fx = fixture("../models/test.adm\nsimulate/transient, end=1.0\nstop\n");
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        mkdir_commands(&remote, "/scratch/test.Ab3d");
        remote.push(
            "asub '/scratch/test.Ab3d/test.acf' --partition 'long run'",
            ok_capture("Submitted batch job 4242\n"),
        );
        let mut session = session(&remote);
        let mut request = SubmissionRequest::new(&fx.control);
        request
            .options
            .push(("partition".to_string(), "long run".to_string()));

        let result = session.submit(&request, false).await.unwrap();

        assert_eq!(
            result,
            SubmissionResult {
                remote_dir: "/scratch/test.Ab3d".to_string(),
                job_name: "test".to_string(),
                job_id: 4242,
            }
        );
        let uploaded: Vec<String> = remote.uploads().into_iter().map(|(path, _)| path).collect();
        assert_eq!(
            uploaded,
            vec!["/scratch/test.Ab3d/test.acf", "/scratch/test.Ab3d/test.adm"]
        );
        assert_eq!(
            remote.uploaded_text("/scratch/test.Ab3d/test.acf").unwrap(),
            "test.adm\nsimulate/transient, end=1.0\nstop\n"
        );
        assert_eq!(session.state(), SubmissionState::Submitted);
        assert_eq!(session.job_id(), Some(4242));
        assert_eq!(session.job_name(), Some("test"));
        assert_eq!(session.remote_dir(), Some("/scratch/test.Ab3d"));
        // The user's file is never modified.
        assert_eq!(
            std::fs::read_to_string(&fx.control).unwrap(),
            "../models/test.adm\nsimulate/transient, end=1.0\nstop\n"
        );
        remote.assert_drained();
    }

    #[tokio::test]
    async fn second_submit_requires_rebind() {
        let fx = fixture("../models/test.adm\n");
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        mkdir_commands(&remote, "/scratch/test.aaaa");
        remote.push(
            "asub '/scratch/test.aaaa/test.acf'",
            ok_capture("Submitted batch job 1\n"),
        );
        let mut session = session(&remote);
        let request = SubmissionRequest::new(&fx.control);
        session.submit(&request, false).await.unwrap();

        let err = session.submit(&request, false).await.unwrap_err();
        assert_eq!(err.code(), codes::ALREADY_SUBMITTED);
        assert_eq!(session.state(), SubmissionState::Submitted);
        assert_eq!(session.job_id(), Some(1));
    }

    #[tokio::test]
    async fn rebinding_reuses_uploads_with_remote_copies() {
        let fx = fixture("../models/test.adm\n");
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        mkdir_commands(&remote, "/scratch/test.aaaa");
        remote.push(
            "asub '/scratch/test.aaaa/test.acf'",
            ok_capture("Submitted batch job 1\n"),
        );
        mkdir_commands(&remote, "/scratch/test.bbbb");
        remote.push(
            "cp '/scratch/test.aaaa/test.acf' '/scratch/test.bbbb/test.acf'",
            ok_capture(""),
        );
        remote.push(
            "cp '/scratch/test.aaaa/test.adm' '/scratch/test.bbbb/test.adm'",
            ok_capture(""),
        );
        remote.push(
            "asub '/scratch/test.bbbb/test.acf'",
            ok_capture("Submitted batch job 2\n"),
        );
        let mut session = session(&remote);
        let request = SubmissionRequest::new(&fx.control);
        session.submit(&request, false).await.unwrap();
        let second = session.submit(&request, true).await.unwrap();

        assert_eq!(second.job_id, 2);
        assert_eq!(second.remote_dir, "/scratch/test.bbbb");
        assert_eq!(remote.uploads().len(), 2);
        remote.assert_drained();
    }

    #[tokio::test]
    async fn explicit_model_and_aux_files_are_uploaded_in_order() {
        let fx = fixture("\nfile/model=/elsewhere/test, output_prefix=run\n");
        let aux = fx.control.parent().unwrap().join("road.rdf");
        std::fs::write(&aux, "[ROAD]\n").unwrap();
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        mkdir_commands(&remote, "/s/test.x");
        remote.push("asub '/s/test.x/test.acf'", ok_capture("Submitted batch job 9\n"));
        let mut session = session(&remote);
        let request = SubmissionRequest {
            control_file: fx.control.clone(),
            model_file: Some(fx.model.clone()),
            aux_files: vec![aux],
            options: Vec::new(),
        };

        session.submit(&request, false).await.unwrap();

        let uploaded: Vec<String> = remote.uploads().into_iter().map(|(path, _)| path).collect();
        assert_eq!(
            uploaded,
            vec!["/s/test.x/test.acf", "/s/test.x/test.adm", "/s/test.x/road.rdf"]
        );
        assert_eq!(
            remote.uploaded_text("/s/test.x/test.acf").unwrap(),
            "\nfile/model=test, output_prefix=run\n"
        );
    }

    #[tokio::test]
    async fn unrecognized_reply_fails_with_both_streams() {
        let fx = fixture("../models/test.adm\n");
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        mkdir_commands(&remote, "/scratch/test.aaaa");
        remote.push(
            "asub '/scratch/test.aaaa/test.acf'",
            stderr_capture("queued?\n", "asub: license server unreachable\n"),
        );
        let mut session = session(&remote);
        let err = session
            .submit(&SubmissionRequest::new(&fx.control), false)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), AppErrorKind::ProtocolParse);
        assert_eq!(err.code(), codes::SUBMISSION_FAILED);
        let context = err.context().unwrap();
        assert!(context.contains("queued?"));
        assert!(context.contains("license server unreachable"));
        assert_eq!(session.state(), SubmissionState::Failed);
        assert_eq!(session.job_id(), None);
    }

    #[tokio::test]
    async fn stderr_fails_even_with_a_job_id() {
        let fx = fixture("../models/test.adm\n");
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        mkdir_commands(&remote, "/scratch/test.aaaa");
        remote.push(
            "asub '/scratch/test.aaaa/test.acf'",
            stderr_capture("Submitted batch job 5\n", "warning: quota\n"),
        );
        let mut session = session(&remote);
        let err = session
            .submit(&SubmissionRequest::new(&fx.control), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::SUBMISSION_FAILED);
    }

    #[tokio::test]
    async fn control_file_without_model_reference_runs_nothing_remotely() {
        let fx = fixture("\nsimulate/static\nstop\n");
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        let mut session = session(&remote);
        let err = session
            .submit(&SubmissionRequest::new(&fx.control), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidArgument);
        assert_eq!(err.code(), codes::NO_MODEL_REFERENCE);
        assert_eq!(session.state(), SubmissionState::Failed);
        assert!(remote.uploads().is_empty());
    }

    #[tokio::test]
    async fn duplicate_input_names_are_rejected() {
        let fx = fixture("../models/test.adm\n");
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        let mut session = session(&remote);
        let request = SubmissionRequest {
            aux_files: vec![fx.model.clone()],
            ..SubmissionRequest::new(&fx.control)
        };
        let err = session.submit(&request, false).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidArgument);
        assert!(err.message().contains("test.adm"));
    }

    #[tokio::test]
    async fn resubmit_cleans_wrappers_and_submits_first_control_file() {
        let remote = Arc::new(
            ScriptedRemote::new(vec![
                ("rm -f '/scratch/car.x1y2'/*.slurm".to_string(), ok_capture("")),
                (
                    "asub '/scratch/car.x1y2/a.acf'".to_string(),
                    ok_capture("Submitted batch job 77\n"),
                ),
            ])
            .with_listing("/scratch/car.x1y2", &["car.res", "b.acf", "a.acf", "car.adm"]),
        );
        let mut session = session(&remote);
        let result = session.resubmit("/scratch/car.x1y2/").await.unwrap();
        assert_eq!(result.job_id, 77);
        assert_eq!(result.job_name, "car");
        assert_eq!(result.remote_dir, "/scratch/car.x1y2");
        assert_eq!(session.state(), SubmissionState::Submitted);
        remote.assert_drained();
    }

    #[tokio::test]
    async fn resubmit_without_control_file_is_not_found() {
        let remote = Arc::new(
            ScriptedRemote::new(vec![(
                "rm -f '/scratch/car.x1y2'/*.slurm".to_string(),
                ok_capture(""),
            )])
            .with_listing("/scratch/car.x1y2", &["car.res"]),
        );
        let mut session = session(&remote);
        let err = session.resubmit("/scratch/car.x1y2").await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::NotFound);
        assert_eq!(session.state(), SubmissionState::Failed);
    }
}
