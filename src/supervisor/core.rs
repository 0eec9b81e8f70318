//! Process supervisor
//!
//! Drives one CLI run from spawn to exit: registers the process under its
//! session, forwards stdout/stderr as events, honours abort requests with a
//! SIGTERM-then-SIGKILL escalation, and cleans up on every exit path.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::attachments::StagedAttachments;
use super::command::CliInvocation;
use super::decoder::ChunkDecoder;
use super::registry::{ProcessInfo, RegisteredProcess, SessionRegistry};
use super::wrapped_child::WrappedChild;
use crate::events::{EventSink, StreamEvent};
use crate::types::{Result, RunOutput, RunRequest, SupervisorConfig, SupervisorError};

/// Bytes requested per pipe read
const READ_BUF_SIZE: usize = 8 * 1024;

/// How a supervised process ended
#[derive(Debug)]
enum RunOutcome {
    /// The process ran and exited
    Exited {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// No process ever existed
    LaunchFailed(SupervisorError),
}

/// Event emission for one run
///
/// Guards the session-started and completed events so each goes out at most
/// once, whichever code path tries to send them.
struct RunEmitter<'a, S: ?Sized> {
    session_id: &'a str,
    sink: &'a S,
    started: AtomicBool,
    completed: AtomicBool,
}

impl<'a, S: EventSink + ?Sized> RunEmitter<'a, S> {
    fn new(session_id: &'a str, sink: &'a S) -> Self {
        Self {
            session_id,
            sink,
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    fn emit(&self, event: StreamEvent) {
        if let Err(e) = self.sink.send(event) {
            tracing::debug!(
                session_id = %self.session_id,
                error = %e,
                "Failed to deliver event"
            );
        }
    }

    fn session_started(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.emit(StreamEvent::session_started(self.session_id));
        }
    }

    fn output(&self, data: String) {
        if !data.is_empty() {
            self.emit(StreamEvent::output(self.session_id, data));
        }
    }

    fn error(&self, error: String) {
        if !error.is_empty() {
            self.emit(StreamEvent::error(self.session_id, error));
        }
    }

    fn completed(&self, exit_code: i32) {
        if !self.completed.swap(true, Ordering::SeqCst) {
            self.emit(StreamEvent::completed(self.session_id, exit_code));
        }
    }
}

/// Unregisters a run when dropped
///
/// Covers a `start` future dropped mid-run as well as the normal exit path.
struct Registration<'a> {
    registry: &'a SessionRegistry,
    session_id: &'a str,
    run_id: Uuid,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.registry.remove_run(self.session_id, self.run_id) {
            tracing::debug!(session_id = %self.session_id, "CLI process unregistered");
        }
    }
}

/// Supervisor for Q CLI runs
///
/// Cheap to share behind an `Arc`; every run borrows it for its duration.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    registry: Arc<SessionRegistry>,
}

impl Supervisor {
    /// Create a supervisor with its own registry
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_registry(config, Arc::new(SessionRegistry::new()))
    }

    /// Create a supervisor around an existing registry
    pub fn with_registry(config: SupervisorConfig, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run one CLI command to completion, streaming events into `sink`
    ///
    /// Resolves with the accumulated stdout on exit code 0. A non-zero exit
    /// resolves to [`SupervisorError::ProcessFailed`]; a process that never
    /// started resolves to a launch error and emits one error event instead
    /// of a completed event.
    pub async fn start<S>(&self, request: RunRequest, sink: &S) -> Result<RunOutput>
    where
        S: EventSink + ?Sized,
    {
        let session_id = request
            .options
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = tracing::info_span!(
            "cli_run",
            session_id = %session_id,
            image_count = request.options.images.len(),
        );

        self.run(session_id, request, sink).instrument(span).await
    }

    async fn run<S>(&self, session_id: String, request: RunRequest, sink: &S) -> Result<RunOutput>
    where
        S: EventSink + ?Sized,
    {
        let emitter = RunEmitter::new(&session_id, sink);

        let cwd = match resolve_working_dir(request.options.cwd.as_deref()) {
            Ok(cwd) => cwd,
            Err(e) => return Err(launch_failed(&emitter, e)),
        };

        if self.registry.contains(&session_id) {
            return Err(launch_failed(
                &emitter,
                SupervisorError::session_already_active(session_id.as_str()),
            ));
        }

        let staged = StagedAttachments::stage(
            &cwd,
            &self.config.staging_dir,
            &request.options.images,
        )
        .await;
        let prompt = staged.augment_prompt(&request.command);
        let invocation = CliInvocation::build(&self.config, &prompt, &request.options, &cwd);

        tracing::info!(
            program = %invocation.program,
            args = ?invocation.args,
            cwd = %invocation.cwd.display(),
            staged_images = staged.paths().len(),
            "Spawning CLI"
        );

        let outcome = self.supervise(&session_id, &invocation, &emitter).await;

        staged.cleanup().await;

        match outcome {
            RunOutcome::Exited {
                exit_code,
                stdout,
                stderr,
            } => {
                emitter.completed(exit_code);
                if exit_code == 0 {
                    tracing::info!("CLI run completed");
                    Ok(RunOutput {
                        session_id,
                        output: stdout,
                    })
                } else {
                    tracing::warn!(exit_code, "CLI run failed");
                    Err(SupervisorError::ProcessFailed {
                        session_id,
                        exit_code,
                        stderr,
                    })
                }
            }
            RunOutcome::LaunchFailed(e) => Err(launch_failed(&emitter, e)),
        }
    }

    /// Spawn, register and pump one process until it exits
    async fn supervise<S>(
        &self,
        session_id: &str,
        invocation: &CliInvocation,
        emitter: &RunEmitter<'_, S>,
    ) -> RunOutcome
    where
        S: EventSink + ?Sized,
    {
        let mut child = match WrappedChild::spawn(invocation.to_command()) {
            Ok(child) => child,
            Err(e) => {
                return RunOutcome::LaunchFailed(SupervisorError::launch_failed(
                    invocation.program.as_str(),
                    e,
                ));
            }
        };

        let pid = child.id();
        let cancel = CancellationToken::new();
        let process = RegisteredProcess::new(session_id, pid, &invocation.cwd, cancel.clone());
        let run_id = process.run_id;

        // Must happen before any output is read so abort always finds it
        if let Err(e) = self.registry.register(process) {
            if let Err(kill_err) = child.kill().await {
                tracing::warn!(pid, error = %kill_err, "Failed to kill rejected process");
            }
            return RunOutcome::LaunchFailed(e);
        }
        let registration = Registration {
            registry: &self.registry,
            session_id,
            run_id,
        };

        tracing::debug!(pid, "CLI process registered");
        emitter.session_started();

        let stdout = child.take_stdout();
        let stderr = child.take_stderr();

        let mut pump = OutputPump::new(emitter, pid);
        let status = pump
            .run(&mut child, stdout, stderr, &cancel, self.config.kill_grace)
            .await;

        drop(registration);

        let (stdout_text, mut stderr_text) = pump.into_text();
        let exit_code = match status {
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                tracing::debug!(pid, exit_code = code, ?status, "CLI process exited");
                code
            }
            Err(e) => {
                tracing::error!(pid, error = %e, "Failed to wait for CLI process");
                stderr_text.push_str(&e.to_string());
                -1
            }
        };

        RunOutcome::Exited {
            exit_code,
            stdout: stdout_text,
            stderr: stderr_text,
        }
    }

    /// Terminate the run bound to `session_id`
    ///
    /// The entry leaves the registry immediately; the owning run sends
    /// SIGTERM and escalates to SIGKILL after the grace period. Returns false
    /// when nothing live is registered for the session.
    pub fn abort(&self, session_id: &str) -> bool {
        match self.registry.take(session_id) {
            Some(process) => {
                let issued = process.request_termination();
                tracing::info!(
                    session_id = %session_id,
                    pid = process.pid,
                    issued,
                    "Abort requested"
                );
                issued
            }
            None => {
                tracing::debug!(session_id = %session_id, "No active process to abort");
                false
            }
        }
    }

    /// Snapshots of every live run
    pub fn active_sessions(&self) -> Vec<ProcessInfo> {
        self.registry.list()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.registry.contains(session_id)
    }

    /// Abort every live run and clear the registry
    ///
    /// Returns how many runs were asked to terminate.
    pub fn shutdown(&self) -> usize {
        let processes = self.registry.drain();
        let mut aborted = 0;
        for process in &processes {
            if process.request_termination() {
                aborted += 1;
            }
        }
        if aborted > 0 {
            tracing::info!(aborted, "Supervisor shutdown aborted live runs");
        }
        aborted
    }
}

/// Emit a launch failure and hand the error back
fn launch_failed<S>(emitter: &RunEmitter<'_, S>, error: SupervisorError) -> SupervisorError
where
    S: EventSink + ?Sized,
{
    tracing::error!(error = %error, "CLI run could not start");
    emitter.error(error.to_string());
    error
}

/// Resolve the working directory without creating it
fn resolve_working_dir(cwd: Option<&Path>) -> Result<PathBuf> {
    let cwd = match cwd {
        Some(path) => std::path::absolute(path)?,
        None => std::env::current_dir()?,
    };

    if cwd.is_dir() {
        Ok(cwd)
    } else {
        Err(SupervisorError::WorkingDirectoryNotFound(cwd))
    }
}

/// Reads one pipe, or never resolves once the pipe is closed
async fn read_some<R>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Forwards both pipes of one child and watches for exit and abort
struct OutputPump<'e, 'a, S: ?Sized> {
    emitter: &'e RunEmitter<'a, S>,
    pid: u32,
    stdout_decoder: ChunkDecoder,
    stderr_decoder: ChunkDecoder,
    stdout_text: String,
    stderr_text: String,
}

impl<'e, 'a, S: EventSink + ?Sized> OutputPump<'e, 'a, S> {
    fn new(emitter: &'e RunEmitter<'a, S>, pid: u32) -> Self {
        Self {
            emitter,
            pid,
            stdout_decoder: ChunkDecoder::new(),
            stderr_decoder: ChunkDecoder::new(),
            stdout_text: String::new(),
            stderr_text: String::new(),
        }
    }

    fn forward_stdout(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.stdout_text.push_str(&text);
        self.emitter.output(text);
    }

    fn forward_stderr(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.stderr_text.push_str(&text);
        self.emitter.error(text);
    }

    fn read_failed(&self, stream: &'static str, error: &io::Error) {
        tracing::warn!(pid = self.pid, stream, error = %error, "Pipe read failed, closing stream");
    }

    /// Pump until the child has exited and both pipes reached EOF
    async fn run<O, E>(
        &mut self,
        child: &mut WrappedChild,
        mut stdout: Option<O>,
        mut stderr: Option<E>,
        cancel: &CancellationToken,
        kill_grace: Duration,
    ) -> io::Result<std::process::ExitStatus>
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let pid = self.pid;
        let mut out_buf = vec![0u8; READ_BUF_SIZE];
        let mut err_buf = vec![0u8; READ_BUF_SIZE];
        let mut status: Option<io::Result<std::process::ExitStatus>> = None;
        let mut kill_deadline: Option<Instant> = None;
        let mut terminating = false;
        let mut force_killed = false;

        loop {
            if stdout.is_none() && stderr.is_none() {
                if let Some(status) = status {
                    return status;
                }
            }

            tokio::select! {
                read = read_some(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                    Ok(0) => {
                        stdout = None;
                        let rest = self.stdout_decoder.finish();
                        self.forward_stdout(rest);
                    }
                    Ok(n) => {
                        let text = self.stdout_decoder.decode(&out_buf[..n]);
                        self.forward_stdout(text);
                    }
                    Err(e) => {
                        self.read_failed("stdout", &e);
                        stdout = None;
                        let rest = self.stdout_decoder.finish();
                        self.forward_stdout(rest);
                    }
                },
                read = read_some(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                    Ok(0) => {
                        stderr = None;
                        let rest = self.stderr_decoder.finish();
                        self.forward_stderr(rest);
                    }
                    Ok(n) => {
                        let text = self.stderr_decoder.decode(&err_buf[..n]);
                        self.forward_stderr(text);
                    }
                    Err(e) => {
                        self.read_failed("stderr", &e);
                        stderr = None;
                        let rest = self.stderr_decoder.finish();
                        self.forward_stderr(rest);
                    }
                },
                // Recreated every iteration; waiting on the child is cancel safe
                result = child.wait(), if status.is_none() => {
                    status = Some(result);
                }
                () = cancel.cancelled(), if !terminating => {
                    terminating = true;
                    if status.is_none() {
                        tracing::info!(pid, grace_ms = kill_grace.as_millis() as u64, "Sending SIGTERM");
                        if let Err(e) = child.terminate() {
                            tracing::warn!(pid, error = %e, "Failed to send SIGTERM");
                        }
                        kill_deadline = Some(Instant::now() + kill_grace);
                    } else {
                        // Exited already; something else holds the pipes open
                        stdout = None;
                        stderr = None;
                    }
                }
                () = sleep_until(kill_deadline), if kill_deadline.is_some() && !force_killed => {
                    force_killed = true;
                    if status.is_none() {
                        tracing::warn!(pid, "Process ignored SIGTERM, sending SIGKILL");
                        if let Err(e) = child.force_kill() {
                            tracing::warn!(pid, error = %e, "Failed to send SIGKILL");
                        }
                    } else {
                        stdout = None;
                        stderr = None;
                    }
                }
            }
        }
    }

    fn into_text(self) -> (String, String) {
        (self.stdout_text, self.stderr_text)
    }
}
