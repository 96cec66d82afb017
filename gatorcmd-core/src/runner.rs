use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::{Result, RunnerError};

/// Exit code recorded when the target executable cannot be resolved.
pub const NOT_FOUND_EXIT: i32 = 127;

/// Exit code recorded when execution fails for any other reason, or when
/// the child terminates without a native exit code (killed by a signal).
pub const ABNORMAL_EXIT: i32 = -1;

/// Runs a single external command, capturing its merged stdout/stderr and
/// optionally mirroring it to the console as it streams.
///
/// A runner executes at most once, either on the caller's task (`run`) or on
/// a background task (`start` + `wait`). The captured output can be read at
/// any time; the exit code only once the run has finished.
pub struct CommandRunner {
    command: Vec<String>,
    mirror: bool,
    work_dir: PathBuf,
    state: Arc<ExecState>,
}

impl CommandRunner {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            mirror: true,
            work_dir: PathBuf::from("."),
            state: Arc::new(ExecState::new()),
        }
    }

    /// Append arguments to the command vector.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(args.into_iter().map(Into::into));
        self
    }

    /// Toggle echoing of captured output to the console. On by default.
    pub fn with_mirroring(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Directory the child is spawned in. Not validated here; an invalid
    /// path surfaces as an execution failure.
    pub fn with_work_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.work_dir = dir.as_ref().to_path_buf();
        self
    }

    /// The effective argument vector.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Execute on the caller's task, returning once the child has terminated
    /// and the exit code is recorded.
    pub async fn run(&self) -> Result<()> {
        let request = self.begin()?;
        request.drive().await;
        Ok(())
    }

    /// Execute on a background task and return immediately. Use [`wait`] to
    /// block until completion.
    ///
    /// [`wait`]: CommandRunner::wait
    pub fn start(&self) -> Result<()> {
        let request = self.begin()?;
        tokio::task::spawn(request.drive());
        Ok(())
    }

    /// Block until an in-flight execution completes. Returns immediately if
    /// execution already finished or never started. Any number of waiters
    /// may call this concurrently; all unblock on completion.
    pub async fn wait(&self) {
        if !self.state.started.load(Ordering::SeqCst) {
            return;
        }
        let mut done = self.state.done_rx.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }

    pub fn is_finished(&self) -> bool {
        *self.state.done_rx.borrow()
    }

    /// The child's recorded exit code, available once [`is_finished`] is
    /// true.
    ///
    /// [`is_finished`]: CommandRunner::is_finished
    pub fn exit_code(&self) -> Result<i32> {
        if !self.is_finished() {
            return Err(RunnerError::NotFinished);
        }
        Ok(self.state.exit_code.load(Ordering::Acquire))
    }

    /// Captured output so far. Partial and monotonically growing while the
    /// child is running, complete once the run has finished.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&lock(&self.state.output)).into_owned()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.state.started_at)
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.state.completed_at)
    }

    fn begin(&self) -> Result<ExecRequest> {
        if self.command.is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        if self.state.started.swap(true, Ordering::SeqCst) {
            return Err(RunnerError::AlreadyStarted);
        }
        *lock(&self.state.started_at) = Some(Utc::now());
        Ok(ExecRequest {
            command: self.command.clone(),
            mirror: self.mirror,
            work_dir: self.work_dir.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

/// Shared between the runner handle and the executing task. Written only by
/// the executing task; readable from any thread.
struct ExecState {
    output: Mutex<Vec<u8>>,
    exit_code: AtomicI32,
    started: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    completed_at: Mutex<Option<DateTime<Utc>>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl ExecState {
    fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            output: Mutex::new(Vec::new()),
            exit_code: AtomicI32::new(0),
            started: AtomicBool::new(false),
            started_at: Mutex::new(None),
            completed_at: Mutex::new(None),
            done_tx,
            done_rx,
        }
    }

    async fn append(&self, chunk: &[u8], mirror: bool) {
        lock(&self.output).extend_from_slice(chunk);
        if mirror {
            let mut stdout = tokio::io::stdout();
            let _ = stdout.write_all(chunk).await;
            let _ = stdout.flush().await;
        }
    }

    /// Records the exit code and flips the finished flag. The flag is the
    /// last state transition; once a reader observes it, the code and the
    /// captured output are final.
    fn finish(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
        *lock(&self.completed_at) = Some(Utc::now());
        let _ = self.done_tx.send(true);
    }
}

/// One execution, detached from the runner handle so it can move onto a
/// background task.
struct ExecRequest {
    command: Vec<String>,
    mirror: bool,
    work_dir: PathBuf,
    state: Arc<ExecState>,
}

impl ExecRequest {
    async fn drive(self) {
        info!(
            command = %self.command.join(" "),
            work_dir = %self.work_dir.display(),
            "Spawning child process"
        );

        let code = match self.stream_child().await {
            Ok(code) => {
                info!(command = %self.command[0], exit_code = code, "Child process finished");
                code
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let message =
                    format!("Error: Command not found: '{}'\n", self.command.join(" "));
                self.state.append(message.as_bytes(), self.mirror).await;
                NOT_FOUND_EXIT
            }
            Err(err) => {
                error!("Error while running {}: {}", quoted(&self.command), err);
                ABNORMAL_EXIT
            }
        };

        self.state.finish(code);
    }

    /// Spawn the child with both pipes captured and drain them in arrival
    /// order until EOF, then wait for termination.
    async fn stream_child(&self) -> std::io::Result<i32> {
        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "child stdout was not piped"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "child stderr was not piped"))?;

        let mut out_buf = [0u8; 4096];
        let mut err_buf = [0u8; 4096];
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => match read? {
                    0 => out_open = false,
                    n => self.state.append(&out_buf[..n], self.mirror).await,
                },
                read = stderr.read(&mut err_buf), if err_open => match read? {
                    0 => err_open = false,
                    n => self.state.append(&err_buf[..n], self.mirror).await,
                },
            }
        }

        let status = child.wait().await?;
        Ok(status.code().unwrap_or(ABNORMAL_EXIT))
    }
}

fn quoted(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| format!("'{arg}'"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(unix)]
    async fn captures_echo_output() {
        let runner = CommandRunner::new(["echo", "hello"]).with_mirroring(false);
        runner.run().await.unwrap();
        assert_eq!(runner.output(), "hello\n");
        assert_eq!(runner.exit_code().unwrap(), 0);
        assert!(runner.is_finished());
    }

    #[tokio::test]
    async fn missing_binary_records_not_found() {
        let runner =
            CommandRunner::new(["not-a-real-command-xyz", "--flag"]).with_mirroring(false);
        runner.run().await.unwrap();
        assert_eq!(runner.exit_code().unwrap(), NOT_FOUND_EXIT);
        let output = runner.output();
        assert!(output.contains("Error: Command not found:"));
        assert!(output.contains("not-a-real-command-xyz --flag"));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let runner = CommandRunner::new(Vec::<String>::new()).with_mirroring(false);
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, RunnerError::EmptyCommand));
        assert!(!runner.is_finished());
    }

    #[tokio::test]
    async fn exit_code_before_completion_is_rejected() {
        let runner = CommandRunner::new(["echo", "hi"]);
        assert!(matches!(runner.exit_code(), Err(RunnerError::NotFinished)));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn background_execution_waits_for_real_exit() {
        let runner =
            CommandRunner::new(["sh", "-c", "sleep 0.2; exit 3"]).with_mirroring(false);
        runner.start().unwrap();
        runner.wait().await;
        assert!(runner.is_finished());
        assert_eq!(runner.exit_code().unwrap(), 3);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn start_returns_before_completion() {
        let runner = CommandRunner::new(["sleep", "0.5"]).with_mirroring(false);
        runner.start().unwrap();
        assert!(!runner.is_finished());
        runner.wait().await;
        assert!(runner.is_finished());
        assert_eq!(runner.exit_code().unwrap(), 0);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn wait_unblocks_every_waiter() {
        let runner =
            Arc::new(CommandRunner::new(["sleep", "0.2"]).with_mirroring(false));
        runner.start().unwrap();

        let first = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner.wait().await;
                runner.is_finished()
            })
        };
        let second = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner.wait().await;
                runner.is_finished()
            })
        };

        assert!(first.await.unwrap());
        assert!(second.await.unwrap());

        // Repeated wait on a finished runner returns immediately.
        runner.wait().await;
        assert_eq!(runner.exit_code().unwrap(), 0);
    }

    #[tokio::test]
    async fn wait_without_start_returns_immediately() {
        let runner = CommandRunner::new(["echo", "hi"]);
        runner.wait().await;
        assert!(!runner.is_finished());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn stderr_is_interleaved_into_capture() {
        let runner =
            CommandRunner::new(["sh", "-c", "echo out; echo err 1>&2"]).with_mirroring(false);
        runner.run().await.unwrap();
        let output = runner.output();
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
        assert_eq!(runner.exit_code().unwrap(), 0);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn honors_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let runner = CommandRunner::new(["pwd"])
            .with_work_dir(&canonical)
            .with_mirroring(false);
        runner.run().await.unwrap();
        assert_eq!(runner.output().trim(), canonical.display().to_string());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn nonzero_exit_code_is_recorded() {
        let runner = CommandRunner::new(["sh", "-c", "exit 42"]).with_mirroring(false);
        runner.run().await.unwrap();
        assert_eq!(runner.exit_code().unwrap(), 42);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn reexecution_is_rejected() {
        let runner = CommandRunner::new(["echo", "once"]).with_mirroring(false);
        runner.run().await.unwrap();
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyStarted));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn appended_args_extend_the_command() {
        let runner = CommandRunner::new(["echo"])
            .with_args(["a", "b"])
            .with_mirroring(false);
        assert_eq!(runner.command(), ["echo", "a", "b"]);
        runner.run().await.unwrap();
        assert_eq!(runner.output(), "a b\n");
    }
}
