//! Wrapped child process with process group support
//!
//! Spawns the CLI through process-wrap so that it leads its own process group
//! (a job object on Windows) and is killed if the run is dropped mid-flight.

use std::io;
use std::pin::Pin;
use std::process::ExitStatus;

use process_wrap::tokio::{ChildWrapper, CommandWrap, KillOnDrop};
use tokio::process::{ChildStderr, ChildStdout, Command};

/// Wrapper around Box<dyn ChildWrapper>
///
/// Signals go to the process group, so the CLI and anything it started are
/// reached together.
#[derive(Debug)]
pub struct WrappedChild {
    inner: Box<dyn ChildWrapper>,
}

impl WrappedChild {
    /// Create a new wrapped child from a process-wrap ChildWrapper
    pub fn new(inner: Box<dyn ChildWrapper>) -> Self {
        Self { inner }
    }

    /// Spawn `command` as the leader of a new process group
    pub fn spawn(command: Command) -> io::Result<Self> {
        let mut wrap = CommandWrap::from(command);

        #[cfg(unix)]
        wrap.wrap(process_wrap::tokio::ProcessGroup::leader());
        #[cfg(windows)]
        wrap.wrap(process_wrap::tokio::JobObject);

        wrap.wrap(KillOnDrop);

        wrap.spawn().map(Self::new)
    }

    /// Get the process ID
    pub fn id(&self) -> u32 {
        self.inner.id().unwrap_or(0)
    }

    /// Take the piped stdout handle
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.inner.stdout().take()
    }

    /// Take the piped stderr handle
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.inner.stderr().take()
    }

    /// Wait for the process to exit
    ///
    /// Cancel safe: dropping the future and calling again keeps waiting.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        Pin::from(self.inner.wait()).await
    }

    /// Kill the process group and wait for exit
    pub async fn kill(&mut self) -> io::Result<()> {
        Pin::from(self.inner.kill()).await
    }

    /// Start killing without waiting for exit
    pub fn start_kill(&mut self) -> io::Result<()> {
        self.inner.start_kill()
    }

    /// Send a signal to the whole process group
    #[cfg(unix)]
    pub fn signal(&self, sig: i32) -> io::Result<()> {
        self.inner.signal(sig)
    }

    /// Ask the process group to exit
    ///
    /// SIGTERM on Unix; Windows has no polite equivalent, so the job object
    /// is killed outright.
    pub fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.signal(libc::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.start_kill()
        }
    }

    /// Kill the process group without waiting
    pub fn force_kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.signal(libc::SIGKILL)
        }
        #[cfg(not(unix))]
        {
            self.start_kill()
        }
    }
}

impl Drop for WrappedChild {
    fn drop(&mut self) {
        // KillOnDrop only reaches the leader; take the rest of the group too
        if let Ok(None) = self.inner.try_wait() {
            if let Err(e) = self.inner.start_kill() {
                tracing::debug!(pid = self.id(), error = %e, "Failed to kill dropped process group");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::Stdio;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_spawn_and_read_stdout() {
        let mut command = Command::new("sh");
        command
            .args(["-c", "echo wrapped"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = WrappedChild::spawn(command).unwrap();
        assert!(child.id() > 0);

        let mut stdout = child.take_stdout().unwrap();
        assert!(child.take_stdout().is_none());

        let mut text = String::new();
        stdout.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "wrapped\n");

        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_kill_long_running_child() {
        let mut command = Command::new("sleep");
        command.arg("30");

        let mut child = WrappedChild::spawn(command).unwrap();
        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_reaches_process_group() {
        // The grandchild would keep running if only the shell were signalled
        let mut command = Command::new("sh");
        command
            .args(["-c", "sleep 30 & wait"])
            .stdout(Stdio::piped());

        let mut child = WrappedChild::spawn(command).unwrap();
        let mut stdout = child.take_stdout().unwrap();
        child.terminate().unwrap();

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());

        // EOF only once every holder of the pipe, the grandchild included, is gone
        let mut rest = Vec::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            stdout.read_to_end(&mut rest),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_drop_kills_process_group() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 30 & wait"]).stdout(Stdio::piped());

        let mut child = WrappedChild::spawn(command).unwrap();
        let mut stdout = child.take_stdout().unwrap();
        drop(child);

        // The backgrounded sleep holds the pipe until the group is killed
        let mut rest = Vec::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            stdout.read_to_end(&mut rest),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_wait_is_restartable() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 0.2"]);

        let mut child = WrappedChild::spawn(command).unwrap();
        let first = tokio::time::timeout(std::time::Duration::from_millis(20), child.wait()).await;
        assert!(first.is_err());

        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = WrappedChild::spawn(Command::new("definitely-not-a-real-binary-q")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
