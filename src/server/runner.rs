//! Supervisor runner
//!
//! Entry point for the binary: sets up logging, builds the supervisor from
//! configuration and runs either the stdio server or a single command.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::handlers::{serve, write_outbound};
use super::protocol::OutboundMessage;
use crate::cli::{Cli, Command, RunArgs};
use crate::events::ChannelSink;
use crate::supervisor::{Supervisor, load_image_file};
use crate::tracing::ErrorTraceExt;
use crate::types::{Result, RunOutput, RunRequest, SupervisorError, ToolsSettings};

// OpenTelemetry imports (only when feature is enabled)
#[cfg(feature = "otel")]
use opentelemetry::global;
#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace::SdkTracerProvider;

// Global storage for OpenTelemetry provider (for proper shutdown)
#[cfg(feature = "otel")]
static OTEL_PROVIDER: std::sync::OnceLock<SdkTracerProvider> = std::sync::OnceLock::new();

/// Shutdown OpenTelemetry provider (flush all pending spans)
#[cfg(feature = "otel")]
pub fn shutdown_otel() {
    if let Some(provider) = OTEL_PROVIDER.get() {
        tracing::info!("Shutting down OpenTelemetry provider...");
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to shutdown OpenTelemetry provider: {:?}", e);
        } else {
            tracing::info!("OpenTelemetry provider shutdown complete");
        }
    }
}

/// Shutdown OpenTelemetry provider (no-op when feature is disabled)
#[cfg(not(feature = "otel"))]
pub fn shutdown_otel() {}

#[cfg(feature = "otel")]
fn init_otel(endpoint: &str, service_name: &str) -> anyhow::Result<SdkTracerProvider> {
    use opentelemetry_sdk::Resource;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_owned())
                .build(),
        )
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(provider)
}

/// Build an EnvFilter based on CLI args and RUST_LOG environment variable
///
/// Priority: RUST_LOG environment variable > CLI arguments (-v, -vv, -q)
fn build_env_filter(cli: &Cli) -> tracing_subscriber::EnvFilter {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            return tracing_subscriber::EnvFilter::new(rust_log);
        }
    }

    let level = cli.log_level();
    tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into())
}

/// Log writer: a file in diagnostic mode, stderr otherwise
///
/// Stdout is reserved for protocol output.
fn log_writer(cli: &Cli) -> anyhow::Result<BoxMakeWriter> {
    if !cli.is_diagnostic() {
        return Ok(BoxMakeWriter::new(std::io::stderr));
    }

    let log_path = cli.log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(&log_path)?;

    eprintln!("Diagnostic mode: logging to {}", log_path.display());

    Ok(BoxMakeWriter::new(std::sync::Mutex::new(file)))
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = build_env_filter(cli);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_writer(cli)?)
        .with_ansi(false);

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = cli.otel_endpoint.as_deref().filter(|_| cli.is_otel_enabled()) {
            let service_name = &cli.otel_service_name;

            eprintln!(
                "OpenTelemetry enabled: endpoint={}, service={}",
                endpoint, service_name
            );

            let provider = init_otel(endpoint, service_name)?;
            let tracer = provider.tracer("qdev-supervisor");
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

            drop(OTEL_PROVIDER.set(provider));

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Run the binary with parsed CLI arguments
///
/// Returns the process exit code: 0 for `serve`, the child's exit code for
/// `run`.
pub async fn run_with_cli(cli: &Cli) -> anyhow::Result<i32> {
    let startup_time = std::time::Instant::now();

    init_logging(cli)?;

    let config = cli.supervisor_config();
    {
        let startup_span = tracing::info_span!(
            "supervisor_startup",
            version = %env!("CARGO_PKG_VERSION"),
            pid = %std::process::id(),
            diagnostic = %cli.is_diagnostic(),
            otel_enabled = %cli.otel_endpoint.is_some(),
        );
        let _enter = startup_span.enter();

        tracing::info!(
            cli_path = %config.cli_path,
            kill_grace_ms = config.kill_grace.as_millis() as u64,
            staging_dir = %config.staging_dir.display(),
            "Supervisor configuration"
        );
        if cli.is_diagnostic() {
            tracing::info!(log_path = %cli.log_path().display(), "Diagnostic mode enabled");
        }
        tracing::info!(
            init_elapsed_ms = startup_time.elapsed().as_millis() as u64,
            "Logging initialized"
        );
    }

    let supervisor = Arc::new(Supervisor::new(config));

    let exit_code = match cli.command() {
        Command::Serve => run_server(supervisor).await?,
        Command::Run(args) => run_single(supervisor, &args).await?,
    };

    let uptime = startup_time.elapsed();
    tracing::info!(
        uptime_ms = uptime.as_millis() as u64,
        exit_code,
        "Supervisor shutdown complete"
    );

    Ok(exit_code)
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received SIGINT");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C");
        }
    }
}

#[tracing::instrument(name = "stdio_server", skip_all)]
async fn run_server(supervisor: Arc<Supervisor>) -> anyhow::Result<i32> {
    tracing::info!("Waiting for JSON-lines messages on stdin...");

    let token = CancellationToken::new();
    let watcher = tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            token.cancel();
        }
    });

    let result = serve(supervisor, tokio::io::stdin(), tokio::io::stdout(), token).await;
    watcher.abort();

    result?;
    Ok(0)
}

/// Turn `run` arguments into a request, reading attached image files
pub async fn build_request(args: &RunArgs) -> Result<RunRequest> {
    let mut request = RunRequest::new(args.prompt.clone());
    request.options.session_id = args.session_id.clone();
    request.options.cwd = args.cwd.clone();
    request.options.resume = args.resume;
    request.options.permission_mode = args.permission_mode;
    request.options.tools_settings = ToolsSettings {
        allowed_tools: args.trust_tools.clone(),
        disallowed_tools: Vec::new(),
        skip_permissions: args.trust_all_tools,
    };

    for path in &args.images {
        let image = load_image_file(path).await.map_err(|e| {
            SupervisorError::invalid_request(format!("cannot read image {}: {e}", path.display()))
        })?;
        request = request.with_image(image);
    }

    Ok(request)
}

/// Exit code reported for a finished run
pub fn exit_code_for(result: &Result<RunOutput>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => match e.exit_code() {
            Some(code) if code > 0 => code,
            _ => 1,
        },
    }
}

/// Interval between abort attempts while a run is still starting
const ABORT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Abort `run` and wait for it to finish
///
/// The process may not be registered yet (attachments still staging, or the
/// spawn in flight), so the abort is repeated until it lands or the run ends.
async fn abort_run<F>(
    supervisor: &Supervisor,
    session_id: &str,
    mut run: Pin<&mut F>,
) -> Result<RunOutput>
where
    F: Future<Output = Result<RunOutput>>,
{
    loop {
        if supervisor.abort(session_id) {
            return run.await;
        }
        tokio::select! {
            result = run.as_mut() => return result,
            () = tokio::time::sleep(ABORT_RETRY_INTERVAL) => {
                tracing::debug!(session_id = %session_id, "Run not registered yet, retrying abort");
            }
        }
    }
}

#[tracing::instrument(name = "single_run", skip_all)]
async fn run_single(supervisor: Arc<Supervisor>, args: &RunArgs) -> anyhow::Result<i32> {
    let mut request = build_request(args).await?;
    let session_id = request
        .options
        .session_id
        .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
        .clone();

    let (tx, rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let writer = tokio::spawn(write_outbound(tokio::io::stdout(), rx));
    let sink = ChannelSink::new(tx);

    let result = {
        let run = supervisor.start(request, &sink);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            () = shutdown_signal() => {
                tracing::info!(session_id = %session_id, "Interrupted, aborting run");
                abort_run(&supervisor, &session_id, run).await
            }
        }
    };
    drop(sink);

    if let Err(e) = &result {
        e.trace_error();
    }
    writer.await??;

    Ok(exit_code_for(&result))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::types::PermissionMode;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_request() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("shot.png");
        std::fs::write(&image, b"png").unwrap();

        let args = RunArgs {
            prompt: "describe".to_string(),
            cwd: Some(dir.path().to_path_buf()),
            session_id: Some("s1".to_string()),
            images: vec![image],
            trust_tools: vec!["fs_read".to_string()],
            permission_mode: PermissionMode::Plan,
            ..Default::default()
        };

        let request = build_request(&args).await.unwrap();
        assert_eq!(request.command, "describe");
        assert_eq!(request.options.session_id.as_deref(), Some("s1"));
        assert_eq!(request.options.tools_settings.allowed_tools, vec!["fs_read"]);
        assert_eq!(request.options.permission_mode, PermissionMode::Plan);
        assert_eq!(request.options.images.len(), 1);
        assert!(request.options.images[0].data.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_build_request_missing_image() {
        let args = RunArgs {
            images: vec![PathBuf::from("/definitely/not/here.png")],
            ..Default::default()
        };
        let err = build_request(&args).await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidRequest(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abort_before_registration() {
        use std::os::unix::fs::PermissionsExt;

        let bin = TempDir::new().unwrap();
        let script = bin.path().join("fake-q");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let supervisor = Supervisor::new(
            crate::types::SupervisorConfig::default()
                .with_cli_path(script.to_string_lossy())
                .with_kill_grace(Duration::from_millis(200)),
        );
        let sink = crate::events::MemorySink::new();
        let request = RunRequest::new("x")
            .with_session_id("s-early")
            .with_cwd(bin.path());

        // Not polled yet, so nothing is registered when the abort starts
        let run = supervisor.start(request, &sink);
        tokio::pin!(run);
        assert!(!supervisor.is_active("s-early"));

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            abort_run(&supervisor, "s-early", run),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(SupervisorError::ProcessFailed { .. })));
        assert!(!supervisor.is_active("s-early"));
    }

    #[test]
    fn test_exit_code_for() {
        let ok: Result<RunOutput> = Ok(RunOutput {
            session_id: "s".to_string(),
            output: String::new(),
        });
        assert_eq!(exit_code_for(&ok), 0);

        let failed = |exit_code| -> Result<RunOutput> {
            Err(SupervisorError::ProcessFailed {
                session_id: "s".to_string(),
                exit_code,
                stderr: String::new(),
            })
        };
        assert_eq!(exit_code_for(&failed(3)), 3);
        assert_eq!(exit_code_for(&failed(-1)), 1);
        assert_eq!(
            exit_code_for(&Err(SupervisorError::session_already_active("s"))),
            1
        );
    }
}
