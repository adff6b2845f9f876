//! Job lifecycle driver
//!
//! Orchestrates submit, retrieve, kill, and the integrated solve-and-wait
//! flow against the RPC session, and owns the polling state machine and its
//! cancellation semantics. Queue load-mutate-save is a single logical step
//! per operation; cancellation is cooperative and checked only between
//! remote calls, never mid-call.

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use colored::Colorize as _;
use kestrel_client::NeosApi;
use kestrel_client::solvers::resolve_solver;
use kestrel_core::{JobHandle, PayloadSpec, SubmissionPayload};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::queue::JobQueueStore;

/// Interval between status polls while a job is non-terminal.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Settle delay between submission and the first poll.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// How an operation ended. `Failure` covers the expected non-error outcomes
/// (empty queue, user interrupt) as well as surfaced errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Failure => ExitCode::FAILURE,
        }
    }
}

pub struct JobDriver<C> {
    service: Arc<C>,
    config: Config,
    store: JobQueueStore,
}

impl<C: NeosApi + 'static> JobDriver<C> {
    pub fn new(service: Arc<C>, config: Config, store: JobQueueStore) -> Self {
        Self {
            service,
            config,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submit the problem at `<stub>.nl` and push the returned handle onto
    /// the queue.
    ///
    /// The push happens after the remote submission succeeds: a crash in
    /// between leaves a live remote job recorded nowhere, which is accepted
    /// since the handle has already been printed for out-of-band recovery.
    /// The opposite order would risk recording jobs that failed to submit.
    pub async fn submit(&self, stub: &str) -> Result<Outcome> {
        let stub = trim_stub(stub);
        println!("Submitting model at {stub}.nl");
        let job =
            Self::submit_problem(Arc::clone(&self.service), self.config.clone(), stub.to_string())
                .await?;
        let mut jobs = self.store.load()?;
        jobs.push(job);
        self.store.save(&jobs)?;
        Ok(Outcome::Success)
    }

    /// Retrieve results for the most recently submitted job and write them
    /// to `<stub>.sol`. An empty queue is an expected failure, not an error.
    pub async fn retrieve(&self, stub: &str) -> Result<Outcome> {
        let stub = trim_stub(stub);
        let mut jobs = self.store.load()?;
        let Some(job) = jobs.pop() else {
            println!(
                "{}",
                format!("No jobs are queued in {}.", self.store.path().display()).yellow()
            );
            println!("{}", "Did you submit first?".yellow());
            return Ok(Outcome::Failure);
        };
        self.fetch_solution(&job, stub).await?;
        if !jobs.is_empty() {
            println!("Rest of the stack, newest first:");
            for job in jobs.iter().rev() {
                println!("  {job}");
            }
        }
        self.store.save(&jobs)?;
        Ok(Outcome::Success)
    }

    /// Cancel a job on the remote server. The queue is left untouched; the
    /// job may or may not have been queued by this machine.
    pub async fn kill(&self, job: &JobHandle) -> Result<Outcome> {
        let confirmation = self.service.kill(job).await?;
        println!("{confirmation}");
        Ok(Outcome::Success)
    }

    /// Submit (or adopt the job named in the configuration) and wait for
    /// completion, printing incremental output until the status turns
    /// terminal, then retrieve the results.
    pub async fn solve(&self, stub: &str, cancel: CancellationToken) -> Result<Outcome> {
        let stub = trim_stub(stub).to_string();
        let job = match self.config.job_override.clone() {
            Some(job) => job,
            None => {
                // Submission runs as its own task so an interrupt can stop
                // the wait immediately; if the submission completes anyway
                // its outcome is not awaited further.
                let submission = tokio::spawn(Self::submit_problem(
                    Arc::clone(&self.service),
                    self.config.clone(),
                    stub.clone(),
                ));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        println!("Interrupt while submitting problem.");
                        return Ok(Outcome::Failure);
                    }
                    joined = submission => joined.context("submission task failed")??,
                }
            }
        };

        sleep(SETTLE_DELAY).await;
        let mut offset = 0;
        loop {
            match self.service.job_status(&job).await {
                Ok(status) if !status.is_active() => break,
                Ok(_) => match self.service.intermediate_output(&job, offset).await {
                    Ok((output, next_offset)) => {
                        print!("{output}");
                        let _ = std::io::stdout().flush();
                        offset = next_offset;
                    }
                    // The job may well be progressing remotely; keep polling.
                    Err(err) => warn!("could not fetch intermediate output: {err}"),
                },
                Err(err) => warn!("could not fetch job status: {err}"),
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.print_interrupt_help(&job);
                    return Ok(Outcome::Failure);
                }
                _ = sleep(POLL_INTERVAL) => {}
            }
        }

        self.fetch_solution(&job, &stub).await?;
        Ok(Outcome::Success)
    }

    /// Resolve the solver, build the payload, and perform the submission.
    /// Prints the assigned handle and the service's progress page.
    async fn submit_problem(service: Arc<C>, config: Config, stub: String) -> Result<JobHandle> {
        let solver = resolve_solver(service.as_ref(), config.solver.as_deref()).await?;
        let spec = PayloadSpec {
            email: config.email.clone(),
            priority: config.priority.clone(),
            solver_options: config.solver_options_for(&solver),
            document_options: config.document_options.clone(),
            solver,
        };
        let payload = SubmissionPayload::build(&stub, &spec)?;
        let job = service.submit(&payload, config.credentials.as_ref()).await?;
        println!(
            "Job {} submitted to NEOS, password='{}'",
            job.number, job.password
        );
        println!("Check the following URL for progress report:");
        println!(
            "https://{}/neos/cgi-bin/nph-neos-solver.cgi?admin=results&jobnumber={}&pass={}",
            config.host, job.number, job.password
        );
        Ok(job)
    }

    async fn fetch_solution(&self, job: &JobHandle, stub: &str) -> Result<()> {
        let solution = self.service.final_results(job).await?;
        let path = format!("{stub}.sol");
        std::fs::write(&path, &solution)
            .with_context(|| format!("could not write results to {path}"))?;
        Ok(())
    }

    fn print_interrupt_help(&self, job: &JobHandle) {
        println!("Keyboard interrupt.");
        println!("The job is still running on the remote server.");
        println!("To stop the job:");
        println!("\tkestrel kill {} {}", job.number, job.password);
        println!("To resume waiting for results, set:");
        println!(
            "\tkestrel_options \"job={} password={}\"",
            job.number, job.password
        );
        println!("and run: kestrel solve");
    }
}

fn trim_stub(stub: &str) -> &str {
    stub.strip_suffix(".nl").unwrap_or(stub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kestrel_client::{ClientError, Credentials};
    use kestrel_core::JobStatus;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted stand-in for the remote service.
    #[derive(Default)]
    struct ScriptedService {
        handles: Mutex<VecDeque<std::result::Result<JobHandle, String>>>,
        statuses: Mutex<VecDeque<JobStatus>>,
        submissions: AtomicUsize,
        status_fetches: AtomicUsize,
        output_fetches: AtomicUsize,
        retrieved: Mutex<Vec<i32>>,
    }

    #[async_trait]
    impl NeosApi for ScriptedService {
        async fn submit(
            &self,
            _payload: &SubmissionPayload,
            _credentials: Option<&Credentials>,
        ) -> kestrel_client::Result<JobHandle> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            match self.handles.lock().unwrap().pop_front() {
                Some(Ok(job)) => Ok(job),
                Some(Err(message)) => Err(ClientError::SubmissionRejected(message)),
                None => Err(ClientError::SubmissionRejected(
                    "no scripted handle".to_string(),
                )),
            }
        }

        async fn job_status(&self, _job: &JobHandle) -> kestrel_client::Result<JobStatus> {
            self.status_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(JobStatus::Other("Done".to_string())))
        }

        async fn intermediate_output(
            &self,
            _job: &JobHandle,
            offset: i32,
        ) -> kestrel_client::Result<(String, i32)> {
            self.output_fetches.fetch_add(1, Ordering::SeqCst);
            Ok((String::new(), offset))
        }

        async fn final_results(&self, job: &JobHandle) -> kestrel_client::Result<String> {
            self.retrieved.lock().unwrap().push(job.number);
            Ok(format!("solution for job {}", job.number))
        }

        async fn kill(&self, job: &JobHandle) -> kestrel_client::Result<String> {
            Ok(format!("Job {} killed.", job.number))
        }

        async fn solvers_in_category(
            &self,
            _category: &str,
        ) -> kestrel_client::Result<Vec<String>> {
            Ok(vec!["CPLEX:AMPL".to_string(), "MINOS:AMPL".to_string()])
        }
    }

    struct Fixture {
        dir: PathBuf,
        service: Arc<ScriptedService>,
        driver: JobDriver<ScriptedService>,
    }

    impl Fixture {
        fn new(name: &str, config: Config) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "kestrel-driver-{name}-{}",
                std::process::id()
            ));
            std::fs::create_dir_all(&dir).unwrap();
            let service = Arc::new(ScriptedService::default());
            let store = JobQueueStore::at(dir.join("queue.jobs"));
            let driver = JobDriver::new(Arc::clone(&service), config, store);
            Self {
                dir,
                service,
                driver,
            }
        }

        /// Create `<name>.nl` in the fixture directory; returns the stub.
        fn stub(&self, name: &str) -> String {
            let stub = self.dir.join(name).to_string_lossy().into_owned();
            std::fs::write(format!("{stub}.nl"), b"g3 1 1 0").unwrap();
            stub
        }

        fn store(&self) -> JobQueueStore {
            JobQueueStore::at(self.dir.join("queue.jobs"))
        }

        fn queued_numbers(&self) -> Vec<i32> {
            self.store()
                .load()
                .unwrap()
                .iter()
                .map(|job| job.number)
                .collect()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn test_config() -> Config {
        Config {
            host: "neos-server.org".to_string(),
            port: 3333,
            email: "user@example.com".to_string(),
            solver: Some("cplex".to_string()),
            priority: None,
            job_override: None,
            credentials: None,
            default_stub: "kmodel".to_string(),
            session_id: None,
            submitted_by: "test on localhost".to_string(),
            document_options: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_runs_until_terminal_status() {
        let mut config = test_config();
        config.job_override = Some(JobHandle::new(77, "pw"));
        let fixture = Fixture::new("poll", config);
        *fixture.service.statuses.lock().unwrap() = VecDeque::from(vec![
            JobStatus::Running,
            JobStatus::Waiting,
            JobStatus::Running,
            JobStatus::Other("Completed".to_string()),
        ]);
        let stub = fixture.stub("model");

        let outcome = fixture
            .driver
            .solve(&stub, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Success);
        // The configured job is adopted; nothing is submitted.
        assert_eq!(fixture.service.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.service.status_fetches.load(Ordering::SeqCst), 4);
        assert_eq!(fixture.service.output_fetches.load(Ordering::SeqCst), 3);
        assert_eq!(*fixture.service.retrieved.lock().unwrap(), vec![77]);
        let solution = std::fs::read_to_string(format!("{stub}.sol")).unwrap();
        assert_eq!(solution, "solution for job 77");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_submission_is_a_clean_failure() {
        let fixture = Fixture::new("cancel-submit", test_config());
        fixture
            .service
            .handles
            .lock()
            .unwrap()
            .push_back(Ok(JobHandle::new(5, "pw")));
        let stub = fixture.stub("model");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = fixture.driver.solve(&stub, cancel).await.unwrap();

        assert_eq!(outcome, Outcome::Failure);
        assert_eq!(fixture.service.status_fetches.load(Ordering::SeqCst), 0);
        assert!(fixture.service.retrieved.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_the_wait_keeps_the_job_remote() {
        let mut config = test_config();
        config.job_override = Some(JobHandle::new(99, "secret"));
        let fixture = Fixture::new("cancel-wait", config);
        *fixture.service.statuses.lock().unwrap() =
            VecDeque::from(vec![JobStatus::Running, JobStatus::Running]);
        let stub = fixture.stub("model");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = fixture.driver.solve(&stub, cancel).await.unwrap();

        // One poll completes, then the interrupt wins the wait race.
        assert_eq!(outcome, Outcome::Failure);
        assert_eq!(fixture.service.status_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.service.output_fetches.load(Ordering::SeqCst), 1);
        assert!(fixture.service.retrieved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn submissions_queue_and_retrieve_in_lifo_order() {
        let fixture = Fixture::new("lifo", test_config());
        {
            let mut handles = fixture.service.handles.lock().unwrap();
            handles.push_back(Ok(JobHandle::new(101, "first")));
            handles.push_back(Ok(JobHandle::new(102, "second")));
            handles.push_back(Ok(JobHandle::new(103, "third")));
        }
        let stub = fixture.stub("model");

        for _ in 0..3 {
            assert_eq!(
                fixture.driver.submit(&stub).await.unwrap(),
                Outcome::Success
            );
        }
        assert_eq!(fixture.queued_numbers(), vec![101, 102, 103]);

        for expected in [103, 102, 101] {
            assert_eq!(
                fixture.driver.retrieve(&stub).await.unwrap(),
                Outcome::Success
            );
            assert_eq!(
                fixture.service.retrieved.lock().unwrap().last(),
                Some(&expected)
            );
        }
        assert_eq!(fixture.queued_numbers(), Vec::<i32>::new());
        assert!(!fixture.store().path().exists());

        // Empty queue is an expected failure, not an error.
        assert_eq!(
            fixture.driver.retrieve(&stub).await.unwrap(),
            Outcome::Failure
        );
    }

    #[tokio::test]
    async fn rejected_submission_is_not_queued() {
        let fixture = Fixture::new("rejected", test_config());
        fixture
            .service
            .handles
            .lock()
            .unwrap()
            .push_back(Err("Error: bad model.\nJob not submitted.".to_string()));
        let stub = fixture.stub("model");

        let err = fixture.driver.submit(&stub).await.unwrap_err();
        match err.downcast_ref::<ClientError>() {
            Some(ClientError::SubmissionRejected(message)) => {
                assert!(message.contains("bad model"));
            }
            other => panic!("expected SubmissionRejected, got {other:?}"),
        }
        assert!(!fixture.store().path().exists());
    }

    #[tokio::test]
    async fn unresolved_solver_fails_before_submission() {
        let mut config = test_config();
        config.solver = Some("gurobi".to_string());
        let fixture = Fixture::new("badsolver", config);
        let stub = fixture.stub("model");

        let err = fixture.driver.submit(&stub).await.unwrap_err();
        match err.downcast_ref::<ClientError>() {
            Some(ClientError::SolverNotAvailable { available, .. }) => {
                assert_eq!(available, &["CPLEX".to_string(), "MINOS".to_string()]);
            }
            other => panic!("expected SolverNotAvailable, got {other:?}"),
        }
        assert_eq!(fixture.service.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn kill_does_not_touch_the_queue() {
        let fixture = Fixture::new("kill", test_config());
        let queued = vec![JobHandle::new(7, "pw")];
        fixture.store().save(&queued).unwrap();

        let outcome = fixture
            .driver
            .kill(&JobHandle::new(55, "other"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(fixture.store().load().unwrap(), queued);
    }
}
