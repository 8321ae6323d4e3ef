// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::{AppError, AppResult};
use crate::app::services::sacct;
use crate::app::session::HpcSession;
use crate::app::types::{BatchOutcome, SubmissionRequest, SubmissionResult};

impl HpcSession {
    /// Blocks until fewer than `max_jobs` of the user's jobs are running.
    ///
    /// There is no upper bound on the wait.
    pub async fn wait_for_capacity(&self, max_jobs: usize) -> AppResult<()> {
        if max_jobs == 0 {
            return Err(AppError::invalid_argument(
                "max_jobs must be at least 1; zero would wait forever",
            ));
        }
        loop {
            let running = sacct::count_running(&self.job_table().await?);
            if running < max_jobs {
                return Ok(());
            }
            log::info!(
                "{running} jobs running (limit {max_jobs}); checking again in {}s",
                self.settings.throttle_interval.as_secs()
            );
            self.clock.sleep(self.settings.throttle_interval).await;
        }
    }

    async fn submit_with_retry(
        &mut self,
        request: &SubmissionRequest,
        max_user_jobs: Option<usize>,
    ) -> AppResult<SubmissionResult> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match max_user_jobs {
                Some(limit) => match self.wait_for_capacity(limit).await {
                    Ok(()) => self.submit(request, true).await,
                    Err(err) => Err(err),
                },
                None => self.submit(request, true).await,
            };
            match outcome {
                Ok(result) => return Ok(result),
                Err(err) if err.is_transient() => {
                    let Some(delay) = self.settings.batch_retry.delay_after(attempt) else {
                        log::error!("giving up on {} after {attempt} attempts", request.control_file.display());
                        return Err(err);
                    };
                    log::warn!(
                        "submitting {} failed ({err}); retry {attempt} in {}s",
                        request.control_file.display(),
                        delay.as_secs()
                    );
                    self.clock.sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Submits every request in order, rebinding the session each time.
    ///
    /// Connectivity failures are retried per the batch policy; anything else aborts the
    /// batch. Consecutive submissions are spaced by the pacing delay.
    pub async fn submit_all(
        &mut self,
        requests: &[SubmissionRequest],
        max_user_jobs: Option<usize>,
    ) -> AppResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for (idx, request) in requests.iter().enumerate() {
            let result = self.submit_with_retry(request, max_user_jobs).await?;
            outcome.push(result);
            if idx + 1 < requests.len() {
                self.clock.sleep(self.settings.pacing).await;
            }
        }
        log::info!("submitted {} jobs", outcome.len());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::{AppErrorKind, codes};
    use crate::app::ports::Connection;
    use crate::app::services::retry::RetryPolicy;
    use crate::app::settings::SessionSettings;
    use crate::app::test_support::{FakeClock, ScriptedRemote, connection_reset, ok_capture};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const SACCT: &str = "sacct -S now-7days -X -P --delimiter=, -o jobid,jobname%-40,start,end,Elapsed,state,timelimit,nnodes,ncpus,submitline%-70,workdir%-70";

    fn session(
        remote: &Arc<ScriptedRemote>,
        clock: &Arc<FakeClock>,
        settings: SessionSettings,
    ) -> HpcSession {
        HpcSession::new(
            "login.cluster",
            "alice",
            Connection {
                exec: remote.clone(),
                files: remote.clone(),
            },
            clock.clone(),
            settings,
        )
    }

    fn table(states: &[&str]) -> String {
        states
            .iter()
            .enumerate()
            .map(|(idx, state)| {
                format!("{idx},j{idx},Unknown,Unknown,Unknown,{state},01:00:00,1,4,asub x,/tmp\n")
            })
            .collect()
    }

    fn control_files(dir: &TempDir, names: &[&str]) -> Vec<SubmissionRequest> {
        names
            .iter()
            .map(|name| {
                let control = dir.path().join(format!("{name}.acf"));
                std::fs::write(&control, format!("{name}.adm\n")).unwrap();
                std::fs::write(dir.path().join(format!("{name}.adm")), "model\n").unwrap();
                SubmissionRequest::new(control)
            })
            .collect()
    }

    fn expect_submission(remote: &ScriptedRemote, name: &str, job_id: u64) {
        let dir = format!("/s/{name}.0000");
        remote.push(format!("mktemp -d '{name}.XXXX'"), ok_capture(&format!("{dir}\n")));
        remote.push(format!("chmod 775 '{dir}'"), ok_capture(""));
        remote.push(
            format!("asub '{dir}/{name}.acf'"),
            ok_capture(&format!("Submitted batch job {job_id}\n")),
        );
    }

    #[tokio::test]
    async fn wait_for_capacity_rejects_zero() {
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        let clock = Arc::new(FakeClock::default());
        let err = session(&remote, &clock, SessionSettings::default())
            .wait_for_capacity(0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn wait_for_capacity_sleeps_while_at_limit() {
        let remote = Arc::new(ScriptedRemote::new(vec![
            (SACCT.to_string(), ok_capture(&table(&["RUNNING", "RUNNING", "PENDING"]))),
            (SACCT.to_string(), ok_capture(&table(&["RUNNING", "RUNNING", "RUNNING"]))),
            (SACCT.to_string(), ok_capture(&table(&["RUNNING", "COMPLETED", "RUNNING"]))),
            (SACCT.to_string(), ok_capture(&table(&["RUNNING", "COMPLETED", "FAILED"]))),
        ]));
        let clock = Arc::new(FakeClock::default());
        session(&remote, &clock, SessionSettings::default())
            .wait_for_capacity(2)
            .await
            .unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 3]);
        remote.assert_drained();
    }

    #[tokio::test]
    async fn submit_all_paces_between_jobs_only() {
        let dir = TempDir::new().unwrap();
        let requests = control_files(&dir, &["a", "b", "c"]);
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        expect_submission(&remote, "a", 11);
        expect_submission(&remote, "b", 12);
        expect_submission(&remote, "c", 13);
        let clock = Arc::new(FakeClock::default());
        let mut session = session(&remote, &clock, SessionSettings::default());

        let outcome = session.submit_all(&requests, None).await.unwrap();

        assert_eq!(outcome.job_ids, vec![11, 12, 13]);
        assert_eq!(outcome.job_names, vec!["a", "b", "c"]);
        assert_eq!(outcome.remote_dirs, vec!["/s/a.0000", "/s/b.0000", "/s/c.0000"]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10); 2]);
        assert_eq!(session.job_id(), Some(13));
        remote.assert_drained();
    }

    #[tokio::test]
    async fn submit_all_throttles_before_each_job() {
        let dir = TempDir::new().unwrap();
        let requests = control_files(&dir, &["a"]);
        let remote = Arc::new(ScriptedRemote::new(vec![
            (SACCT.to_string(), ok_capture(&table(&["RUNNING"]))),
            (SACCT.to_string(), ok_capture(&table(&["COMPLETED"]))),
        ]));
        expect_submission(&remote, "a", 5);
        let clock = Arc::new(FakeClock::default());
        let mut session = session(&remote, &clock, SessionSettings::default());

        session.submit_all(&requests, Some(1)).await.unwrap();

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
        remote.assert_drained();
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let requests = control_files(&dir, &["a"]);
        let remote = Arc::new(ScriptedRemote::new(vec![(
            "mktemp -d 'a.XXXX'".to_string(),
            Err(connection_reset()),
        )]));
        expect_submission(&remote, "a", 8);
        let clock = Arc::new(FakeClock::default());
        let mut session = session(&remote, &clock, SessionSettings::default());

        let outcome = session.submit_all(&requests, None).await.unwrap();

        assert_eq!(outcome.job_ids, vec![8]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn failed_reconnect_mid_batch_is_retried() {
        let dir = TempDir::new().unwrap();
        let requests = control_files(&dir, &["a", "b"]);
        let unreachable = AppError::with_message(
            AppErrorKind::Connectivity,
            codes::CONNECTION_FAILURE,
            "ssh connect failed: could not connect to 10.0.0.1:22: No route to host",
        );
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        expect_submission(&remote, "a", 21);
        remote.push("mktemp -d 'b.XXXX'", Err(connection_reset()));
        remote.push("mktemp -d 'b.XXXX'", Err(unreachable.clone()));
        remote.push("mktemp -d 'b.XXXX'", Err(unreachable));
        expect_submission(&remote, "b", 22);
        let clock = Arc::new(FakeClock::default());
        let mut session = session(&remote, &clock, SessionSettings::default());

        let outcome = session.submit_all(&requests, None).await.unwrap();

        assert_eq!(outcome.job_ids, vec![21, 22]);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(60),
                Duration::from_secs(60),
                Duration::from_secs(60)
            ]
        );
        remote.assert_drained();
    }

    #[tokio::test]
    async fn retry_ceiling_reraises_the_error() {
        let dir = TempDir::new().unwrap();
        let requests = control_files(&dir, &["a", "b"]);
        let remote = Arc::new(ScriptedRemote::new(vec![
            ("mktemp -d 'a.XXXX'".to_string(), Err(connection_reset())),
            ("mktemp -d 'a.XXXX'".to_string(), Err(connection_reset())),
            ("mktemp -d 'a.XXXX'".to_string(), Err(connection_reset())),
        ]));
        let clock = Arc::new(FakeClock::default());
        let settings = SessionSettings {
            batch_retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
            ..SessionSettings::default()
        };
        let mut session = session(&remote, &clock, settings);

        let err = session.submit_all(&requests, None).await.unwrap_err();

        assert_eq!(err.code(), codes::CONNECTION_RESET);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
        remote.assert_drained();
    }

    #[tokio::test]
    async fn non_transient_failure_aborts_without_retry() {
        let dir = TempDir::new().unwrap();
        let mut requests = control_files(&dir, &["a"]);
        requests.insert(0, SubmissionRequest::new(PathBuf::from("/nonexistent/x.acf")));
        let remote = Arc::new(ScriptedRemote::new(vec![]));
        let clock = Arc::new(FakeClock::default());
        let mut session = session(&remote, &clock, SessionSettings::default());

        let err = session.submit_all(&requests, None).await.unwrap_err();

        assert_eq!(err.kind(), AppErrorKind::NotFound);
        assert!(clock.sleeps().is_empty());
    }
}
