//! Stdio message handlers
//!
//! Reads JSON lines, dispatches them to the supervisor and funnels every
//! outbound message through a single writer task so lines never interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::protocol::{ControlMessage, InboundMessage, OutboundMessage};
use crate::events::ChannelSink;
use crate::supervisor::Supervisor;
use crate::tracing::{ErrorTraceExt, ResultTraceExt};
use crate::types::{Result, RunRequest, SupervisorError};

/// Interval between shutdown sweeps while runs are still draining
const SHUTDOWN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Dispatches inbound messages for one stdio connection
#[derive(Debug)]
pub struct StdioServer {
    supervisor: Arc<Supervisor>,
    tx: mpsc::UnboundedSender<OutboundMessage>,
    runs: JoinSet<()>,
}

impl StdioServer {
    pub fn new(supervisor: Arc<Supervisor>, tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            supervisor,
            tx,
            runs: JoinSet::new(),
        }
    }

    /// Number of runs still in flight
    pub fn running(&self) -> usize {
        self.runs.len()
    }

    /// Handle one input line
    pub fn handle_line(&mut self, line: &str) {
        while self.runs.try_join_next().is_some() {}

        if line.trim().is_empty() {
            return;
        }

        match InboundMessage::parse(line) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                e.trace_error();
                self.reply(ControlMessage::protocol_error(&e));
            }
        }
    }

    pub fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Command(request) => self.handle_command(request),
            InboundMessage::AbortSession { session_id } => self.handle_abort(session_id),
            InboundMessage::ListSessions => self.handle_list(),
        }
    }

    fn handle_command(&mut self, request: RunRequest) {
        let supervisor = self.supervisor.clone();
        let sink = ChannelSink::new(self.tx.clone());
        let span = tracing::info_span!(
            "handle_command",
            prompt_len = request.command.len(),
            session_id = ?request.options.session_id,
        );

        self.runs.spawn(
            async move {
                match supervisor.start(request, &sink).await {
                    Ok(output) => tracing::debug!(
                        session_id = %output.session_id,
                        output_len = output.output.len(),
                        "Command finished"
                    ),
                    Err(e) => {
                        e.trace_error();
                    }
                }
            }
            .instrument(span),
        );
    }

    fn handle_abort(&self, session_id: String) {
        let success = self.supervisor.abort(&session_id);
        tracing::info!(session_id = %session_id, success, "Handled abort-session");
        self.reply(ControlMessage::SessionAborted {
            session_id,
            success,
        });
    }

    fn handle_list(&self) {
        let sessions = self.supervisor.active_sessions();
        let session_ids = sessions.iter().map(|s| s.session_id.clone()).collect();
        self.reply(ControlMessage::ActiveSessions {
            session_ids,
            sessions,
        });
    }

    fn reply(&self, message: ControlMessage) {
        if self.tx.send(message.into()).is_err() {
            tracing::debug!("Output writer closed, dropping reply");
        }
    }

    /// Abort every run and wait for all of them to finish
    ///
    /// Runs that register after the first sweep are caught by a later one.
    pub async fn shutdown(mut self) {
        loop {
            let aborted = self.supervisor.shutdown();
            if aborted > 0 {
                tracing::info!(aborted, pending = self.runs.len(), "Aborting runs on shutdown");
            }

            tokio::select! {
                next = self.runs.join_next() => match next {
                    None => break,
                    Some(Err(e)) => tracing::error!(error = %e, "Run task failed"),
                    Some(Ok(())) => {}
                },
                () = tokio::time::sleep(SHUTDOWN_SWEEP_INTERVAL) => {}
            }
        }
    }
}

/// Write outbound messages as JSON lines until every sender is gone
pub async fn write_outbound<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                e.trace_error();
                continue;
            }
        };
        line.push('\n');
        writer.write_all(line.as_bytes()).await.trace_context()?;
        writer.flush().await.trace_context()?;
    }
    writer.flush().await.trace_context()?;
    Ok(())
}

/// Serve the JSON-lines protocol until EOF or `shutdown` fires
pub async fn serve<R, W>(
    supervisor: Arc<Supervisor>,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_outbound(writer, rx));

    let mut server = StdioServer::new(supervisor, tx);
    let mut lines = BufReader::new(reader).lines();

    let read_result = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => server.handle_line(&line),
                Ok(None) => {
                    tracing::info!("Input closed");
                    break Ok(());
                }
                Err(e) => break Err(SupervisorError::from(e)),
            },
            () = shutdown.cancelled() => {
                tracing::info!("Shutdown requested");
                break Ok(());
            }
        }
    };

    tracing::debug!(running = server.running(), "Draining runs");
    server.shutdown().await;

    writer_task
        .await
        .map_err(|e| SupervisorError::internal(format!("writer task failed: {e}")))??;

    read_result
}
