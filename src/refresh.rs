//! Scheduled regeneration of the recommender artifacts.
//!
//! The artifacts are produced by an external notebook, executed with
//! `papermill`. The scheduler runs it once immediately and then on a fixed
//! period, bounding each run with a timeout and publishing the outcome on a
//! watch channel. Artifacts the notebook rewrites are not reloaded.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use failure::Fail;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default notebook file name, relative to the working directory.
pub const DEFAULT_NOTEBOOK: &str = "scheduler.ipynb";
/// Default executed-notebook file name, relative to the working directory.
pub const DEFAULT_OUTPUT: &str = "scheduler_out.ipynb";
/// Default period between runs.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default bound on a single run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Kernel preferred when none is configured.
pub const PREFERRED_KERNEL: &str = "python3";

const STDERR_TAIL_LINES: usize = 20;

// tokio rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Refresh error types.
#[derive(Debug, Fail, PartialEq)]
pub enum RefreshError {
    /// The notebook file does not exist.
    #[fail(display = "Notebook not found: {}", path)]
    NotebookMissing {
        /// Path that was looked up.
        path: String,
    },
    /// No kernel is configured and none is installed.
    #[fail(display = "No Jupyter kernel is installed")]
    NoKernel,
    /// Installed kernels could not be listed.
    #[fail(display = "Could not list Jupyter kernels: {}", _0)]
    KernelList(String),
    /// An executable could not be started.
    #[fail(display = "Failed to execute {}: {}", program, reason)]
    Spawn {
        /// The executable.
        program: String,
        /// OS error message.
        reason: String,
    },
    /// The notebook run exited unsuccessfully.
    #[fail(display = "Notebook execution failed: {}", stderr)]
    Failed {
        /// Tail of the run's stderr.
        stderr: String,
    },
    /// The run exceeded its timeout and was killed.
    #[fail(display = "Notebook execution timed out after {}s", after_secs)]
    TimedOut {
        /// The timeout, in whole seconds.
        after_secs: u64,
    },
}

/// Where the notebook lives and how it is run.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshConfig {
    /// Notebook to execute.
    pub notebook: PathBuf,
    /// Where the executed notebook is written.
    pub output: PathBuf,
    /// Working directory of the run.
    pub working_dir: PathBuf,
    /// Kernel to run with; discovered from the installed kernels when `None`.
    pub kernel: Option<String>,
    /// Period between runs.
    pub interval: Duration,
    /// Bound on a single run.
    pub timeout: Duration,
}

impl RefreshConfig {
    /// Default notebook and output names inside `working_dir`, run daily
    /// with a one hour bound.
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Self {
        let working_dir = working_dir.as_ref().to_path_buf();

        RefreshConfig {
            notebook: working_dir.join(DEFAULT_NOTEBOOK),
            output: working_dir.join(DEFAULT_OUTPUT),
            working_dir,
            kernel: None,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use `notebook` as input and write the executed copy to `output`.
    pub fn with_notebook<P: Into<PathBuf>>(mut self, notebook: P, output: P) -> Self {
        self.notebook = notebook.into();
        self.output = output.into();
        self
    }

    /// Run with `kernel`, or discover one when `None`.
    pub fn with_kernel<S: Into<String>>(mut self, kernel: Option<S>) -> Self {
        self.kernel = kernel.map(|x| x.into());
        self
    }

    /// Set the period between runs.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the bound on a single run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A single notebook execution.
#[derive(Clone, Debug, PartialEq)]
pub struct NotebookJob {
    /// Notebook to execute.
    pub input: PathBuf,
    /// Executed notebook destination.
    pub output: PathBuf,
    /// Working directory of the run.
    pub working_dir: PathBuf,
    /// Kernel name.
    pub kernel: String,
}

/// Captured result of an external command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandOutput {
    /// Whether the command exited successfully.
    pub success: bool,
    /// Exit code, absent when killed by a signal.
    pub code: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// The last `lines` lines of stderr.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.trim_end().lines().collect();
        let start = all.len().saturating_sub(lines);

        all[start..].join("\n")
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Executes notebooks. Mocked in tests.
#[async_trait]
pub trait NotebookRunner: Send + Sync {
    /// Run the notebook described by `job` to completion.
    async fn execute(&self, job: &NotebookJob) -> Result<CommandOutput, RefreshError>;

    /// Names of the installed kernels.
    async fn installed_kernels(&self) -> Result<Vec<String>, RefreshError>;
}

/// Runs notebooks with the `papermill` and `jupyter` executables.
#[derive(Clone, Debug)]
pub struct PapermillRunner {
    papermill: PathBuf,
    jupyter: PathBuf,
}

impl PapermillRunner {
    /// Use the given `papermill` and `jupyter` executables.
    pub fn new<P: Into<PathBuf>>(papermill: P, jupyter: P) -> Self {
        PapermillRunner {
            papermill: papermill.into(),
            jupyter: jupyter.into(),
        }
    }
}

impl Default for PapermillRunner {
    fn default() -> Self {
        PapermillRunner::new("papermill", "jupyter")
    }
}

#[async_trait]
impl NotebookRunner for PapermillRunner {
    async fn execute(&self, job: &NotebookJob) -> Result<CommandOutput, RefreshError> {
        let mut cmd = Command::new(&self.papermill);
        cmd.arg(&job.input)
            .arg(&job.output)
            .arg("--kernel")
            .arg(&job.kernel)
            .arg("--cwd")
            .arg(&job.working_dir)
            .kill_on_drop(true);

        debug!(command = ?cmd, "Executing papermill");

        let output = cmd.output().await.map_err(|e| RefreshError::Spawn {
            program: self.papermill.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(CommandOutput::from(output))
    }

    async fn installed_kernels(&self) -> Result<Vec<String>, RefreshError> {
        let output = Command::new(&self.jupyter)
            .args(["kernelspec", "list", "--json"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RefreshError::Spawn {
                program: self.jupyter.display().to_string(),
                reason: e.to_string(),
            })?;

        let output = CommandOutput::from(output);
        if !output.success {
            return Err(RefreshError::KernelList(output.stderr_tail(STDERR_TAIL_LINES)));
        }

        parse_kernelspecs(&output.stdout)
    }
}

#[derive(Deserialize)]
struct KernelSpecs {
    kernelspecs: BTreeMap<String, serde_json::Value>,
}

/// Kernel names, sorted, from the output of `jupyter kernelspec list --json`.
pub fn parse_kernelspecs(json: &str) -> Result<Vec<String>, RefreshError> {
    let specs: KernelSpecs =
        serde_json::from_str(json).map_err(|e| RefreshError::KernelList(e.to_string()))?;

    Ok(specs.kernelspecs.into_iter().map(|(name, _)| name).collect())
}

/// The configured kernel; otherwise `python3` when installed, otherwise the
/// first installed kernel by name.
pub fn pick_kernel(configured: Option<&str>, installed: &[String]) -> Result<String, RefreshError> {
    if let Some(kernel) = configured {
        return Ok(kernel.to_owned());
    }

    if installed.iter().any(|x| x == PREFERRED_KERNEL) {
        return Ok(PREFERRED_KERNEL.to_owned());
    }

    installed
        .iter()
        .min()
        .cloned()
        .ok_or(RefreshError::NoKernel)
}

/// Run the notebook once, returning how long it took.
pub async fn run_once<R: NotebookRunner + ?Sized>(
    runner: &R,
    config: &RefreshConfig,
) -> Result<Duration, RefreshError> {
    if !config.notebook.is_file() {
        return Err(RefreshError::NotebookMissing {
            path: config.notebook.display().to_string(),
        });
    }

    let started = Instant::now();

    match time::timeout(config.timeout, execute(runner, config)).await {
        Ok(result) => result.map(|_| started.elapsed()),
        Err(_) => Err(RefreshError::TimedOut {
            after_secs: config.timeout.as_secs(),
        }),
    }
}

async fn execute<R: NotebookRunner + ?Sized>(
    runner: &R,
    config: &RefreshConfig,
) -> Result<(), RefreshError> {
    let kernel = match config.kernel {
        Some(ref kernel) => kernel.clone(),
        None => pick_kernel(None, &runner.installed_kernels().await?)?,
    };

    let job = NotebookJob {
        input: config.notebook.clone(),
        output: config.output.clone(),
        working_dir: config.working_dir.clone(),
        kernel,
    };

    info!(notebook = %job.input.display(), kernel = %job.kernel, "Running notebook");

    let output = runner.execute(&job).await?;

    if output.success {
        Ok(())
    } else {
        Err(RefreshError::Failed {
            stderr: output.stderr_tail(STDERR_TAIL_LINES),
        })
    }
}

/// Outcome of the most recent refresh.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshStatus {
    /// No run has started yet.
    Idle,
    /// A run is in progress.
    Running,
    /// The last run succeeded.
    Succeeded {
        /// Duration of the run.
        elapsed_ms: u64,
    },
    /// The last run failed.
    Failed {
        /// Error message of the failure.
        reason: String,
    },
    /// The last run was killed at its timeout.
    TimedOut {
        /// The timeout, in whole seconds.
        after_secs: u64,
    },
}

impl<'a> From<&'a Result<Duration, RefreshError>> for RefreshStatus {
    fn from(result: &'a Result<Duration, RefreshError>) -> Self {
        match result {
            Ok(elapsed) => RefreshStatus::Succeeded {
                elapsed_ms: elapsed.as_millis() as u64,
            },
            Err(RefreshError::TimedOut { after_secs }) => RefreshStatus::TimedOut {
                after_secs: *after_secs,
            },
            Err(err) => RefreshStatus::Failed {
                reason: err.to_string(),
            },
        }
    }
}

/// Periodic notebook execution.
pub struct RefreshScheduler<R: NotebookRunner = PapermillRunner> {
    config: RefreshConfig,
    runner: Arc<R>,
}

impl RefreshScheduler<PapermillRunner> {
    /// A scheduler running notebooks with the default executables.
    pub fn new(config: RefreshConfig) -> Self {
        RefreshScheduler::with_runner(config, PapermillRunner::default())
    }
}

impl<R: NotebookRunner + 'static> RefreshScheduler<R> {
    /// A scheduler executing notebooks through `runner`.
    pub fn with_runner(config: RefreshConfig, runner: R) -> Self {
        RefreshScheduler {
            config,
            runner: Arc::new(runner),
        }
    }

    /// The schedule configuration.
    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Start the background task. The first run begins immediately; later
    /// runs follow every `interval`, and a run that overruns delays the next
    /// tick rather than triggering a burst.
    pub fn spawn(self) -> RefreshHandle {
        let (status_tx, status_rx) = watch::channel(RefreshStatus::Idle);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let RefreshScheduler { config, runner } = self;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(config.interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                status_tx.send_replace(RefreshStatus::Running);

                // Dropping the run on shutdown kills the child process.
                let result = tokio::select! {
                    result = run_once(runner.as_ref(), &config) => result,
                    _ = shutdown_rx.changed() => break,
                };

                match result {
                    Ok(ref elapsed) => info!(
                        notebook = %config.notebook.display(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Notebook refresh succeeded"
                    ),
                    Err(ref err) => warn!(
                        notebook = %config.notebook.display(),
                        error = %err,
                        "Notebook refresh failed"
                    ),
                }

                status_tx.send_replace(RefreshStatus::from(&result));
            }

            debug!("Refresh scheduler stopped");
        });

        RefreshHandle {
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running [`RefreshScheduler`]. Dropping it stops the schedule.
pub struct RefreshHandle {
    status: watch::Receiver<RefreshStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Outcome of the latest run.
    pub fn status(&self) -> RefreshStatus {
        self.status.borrow().clone()
    }

    /// A receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<RefreshStatus> {
        self.status.clone()
    }

    /// Stop the schedule, terminating any run in progress.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        if let Err(err) = self.task.await {
            warn!(error = %err, "Refresh scheduler task failed");
        }
    }
}
