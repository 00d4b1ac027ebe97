//! Command-line client for hopper imports.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hopper_client::{ApiClient, ImportApi, PipelineController, PipelineEvent, PipelineResult, PipelineState};
use hopper_core::chunk::TransferPlan;
use hopper_core::config::ClientConfig;
use hopper_core::job::{JobId, JobStats, RowError, UploadOutcome};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hopper")]
#[command(about = "Bulk spreadsheet import client")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    client: ClientArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClientArgs {
    /// Client config file path
    #[arg(
        long,
        env = "HOPPER_CLIENT_CONFIG",
        default_value = "config/client.toml",
        global = true
    )]
    config: PathBuf,

    /// Server URL (overrides client config)
    #[arg(long, global = true)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and follow its import job to the end
    Import { path: PathBuf },
    /// Show the current state of an import job
    Status { job_id: String },
    /// Show how a file would be sent without sending it
    Plan { path: PathBuf },
    /// Show the server's import limits
    Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Progress bars own stdout; logs go to stderr and default to warnings
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { client, command } = Cli::parse();
    let config = resolve_config(&client)?;

    match command {
        Commands::Import { path } => handle_import(&config, &path).await,
        Commands::Status { job_id } => handle_status(&config, &job_id).await,
        Commands::Plan { path } => handle_plan(&config, &path).await,
        Commands::Capabilities => handle_capabilities(&config).await,
    }
}

fn resolve_config(args: &ClientArgs) -> Result<ClientConfig> {
    let mut config = load_client_config(&args.config)?;
    if let Some(server) = &args.server {
        config.server_url = server.clone();
    }
    Ok(config)
}

fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("HOPPER_CLIENT_").ignore(&["CONFIG"]).split("__"));

    let config: ClientConfig = figment
        .extract()
        .context("failed to load client configuration")?;
    config
        .policy
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid client configuration: {e}"))?;
    Ok(config)
}

fn api_client(config: &ClientConfig) -> Result<ApiClient> {
    ApiClient::new(&config.server_url, config.policy.request_timeout())
}

async fn handle_import(config: &ClientConfig, path: &Path) -> Result<()> {
    let (mut controller, mut events) = PipelineController::connect(config)?;

    let cancel = controller.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling import...");
            cancel.cancel();
        }
    });

    let mut progress = ImportProgress::new(path)?;
    let render = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            progress.handle(event);
        }
    });

    let result = controller.run(path).await;
    interrupt.abort();
    // Closing the event channel lets the renderer drain and exit
    drop(controller);
    render.await.context("progress renderer panicked")?;

    match result {
        PipelineResult::Cancelled => {
            println!("Import cancelled.");
            Ok(())
        }
        PipelineResult::Finished(outcome) => {
            print_outcome(&outcome);
            if outcome.success {
                Ok(())
            } else {
                anyhow::bail!("import failed: {}", outcome.message)
            }
        }
    }
}

async fn handle_status(config: &ClientConfig, job_id: &str) -> Result<()> {
    let job_id = JobId::parse(job_id)?;
    let snapshot = api_client(config)?
        .job_status(job_id)
        .await
        .with_context(|| format!("failed to fetch status of job {job_id}"))?;

    println!("Job:     {}", snapshot.job_id);
    if let Some(file_id) = snapshot.file_id {
        println!("File:    {file_id}");
    }
    println!(
        "State:   {} ({}%)",
        snapshot.state,
        snapshot.stats.percent(snapshot.state)
    );
    if !snapshot.message.is_empty() {
        println!("Message: {}", snapshot.message);
    }
    println!("{}", format_stats(&snapshot.stats));
    print_row_errors(&snapshot.errors, snapshot.stats.errors);
    Ok(())
}

async fn handle_plan(config: &ClientConfig, path: &Path) -> Result<()> {
    if !config.policy.is_allowed_file(path) {
        anyhow::bail!(
            "{} is not one of the accepted types ({})",
            path.display(),
            config.policy.allowed_extensions.join(", ")
        );
    }
    let size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    let plan = config.policy.plan(size)?;

    for line in describe_plan(&plan) {
        println!("{line}");
    }
    Ok(())
}

async fn handle_capabilities(config: &ClientConfig) -> Result<()> {
    let caps = api_client(config)?
        .capabilities()
        .await
        .context("failed to fetch server capabilities")?;

    println!("Server:            {}", config.server_url);
    println!("Max file size:     {}", HumanBytes(caps.max_file_size));
    println!("Max chunk size:    {}", HumanBytes(caps.max_chunk_size));
    println!("Errors surfaced:   {}", caps.max_errors_surfaced);
    println!("Header marker:     {}", caps.header_marker);
    Ok(())
}

fn describe_plan(plan: &TransferPlan) -> Vec<String> {
    match plan {
        TransferPlan::SingleShot { file_size } => vec![format!(
            "Single request: {} ({file_size} bytes)",
            HumanBytes(*file_size)
        )],
        TransferPlan::Chunked {
            file_size,
            chunk_size,
            chunks,
        } => {
            let mut lines = vec![format!(
                "Chunked: {} in {} chunks of up to {}",
                HumanBytes(*file_size),
                chunks.len(),
                HumanBytes(*chunk_size)
            )];
            lines.extend(chunks.iter().map(|chunk| {
                format!(
                    "  #{:<4} bytes {}..{} ({})",
                    chunk.ordinal,
                    chunk.start,
                    chunk.end,
                    HumanBytes(chunk.len())
                )
            }));
            lines
        }
    }
}

fn format_stats(stats: &JobStats) -> String {
    format!(
        "Rows:    {} of {} processed, {} created, {} updated, {} errors",
        stats.processed, stats.total, stats.created, stats.updated, stats.errors
    )
}

fn print_row_errors(errors: &[RowError], total_errors: u64) {
    if errors.is_empty() {
        return;
    }
    println!();
    println!("{:<8} {:<16} MESSAGE", "ROW", "IDENTIFIER");
    for error in errors {
        println!("{:<8} {:<16} {}", error.row, error.identifier, error.message);
    }
    let hidden = total_errors.saturating_sub(errors.len() as u64);
    if hidden > 0 {
        println!("... and {hidden} more");
    }
}

fn print_outcome(outcome: &UploadOutcome) {
    if outcome.success {
        println!("Import completed.");
    } else {
        println!("Import failed.");
    }
    if !outcome.message.is_empty() {
        println!("Message: {}", outcome.message);
    }
    println!("{}", format_stats(&outcome.stats));
    print_row_errors(&outcome.errors, outcome.stats.errors);
}

/// Terminal rendering of pipeline events.
struct ImportProgress {
    mp: MultiProgress,
    style: ProgressStyle,
    transfer: ProgressBar,
    job: Option<ProgressBar>,
}

impl ImportProgress {
    fn new(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let style = ProgressStyle::with_template("{prefix:<10} {bar:40.green/blue} {pos:>3}% {msg}")?
            .progress_chars("██ ");

        let mp = MultiProgress::new();
        let transfer = mp.add(ProgressBar::new(100));
        transfer.set_style(style.clone());
        transfer.set_prefix("upload");
        transfer.set_message(name);

        Ok(Self {
            mp,
            style,
            transfer,
            job: None,
        })
    }

    fn job_bar(&mut self) -> &ProgressBar {
        self.job.get_or_insert_with(|| {
            let bar = self.mp.add(ProgressBar::new(100));
            bar.set_style(self.style.clone());
            bar.set_prefix("import");
            bar
        })
    }

    fn handle(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::TransferProgress(percent) => self.transfer.set_position(percent.into()),
            PipelineEvent::State(PipelineState::AwaitingAssembly) => {
                self.transfer.finish_with_message("assembled");
            }
            PipelineEvent::State(PipelineState::Processing) => {
                self.job_bar().set_message("queued");
            }
            PipelineEvent::JobProgress {
                state,
                percent,
                stats,
            } => {
                let bar = self.job_bar();
                bar.set_position(percent.into());
                bar.set_message(format!(
                    "{state}: {}/{} rows, {} errors",
                    stats.processed, stats.total, stats.errors
                ));
            }
            PipelineEvent::State(PipelineState::Completed) => self.finish(true),
            PipelineEvent::State(PipelineState::Failed | PipelineState::Cancelled) => {
                self.finish(false)
            }
            PipelineEvent::State(_) => {}
        }
    }

    fn finish(&mut self, success: bool) {
        for bar in std::iter::once(&self.transfer).chain(self.job.as_ref()) {
            if bar.is_finished() {
                continue;
            }
            if success {
                bar.finish();
            } else {
                bar.abandon();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::config::TransferPolicy;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses_import_with_global_flags() {
        let cli = Cli::try_parse_from([
            "hopper",
            "import",
            "roster.csv",
            "--server",
            "http://imports.internal:9000",
            "--config",
            "/tmp/client.toml",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::Import { ref path } if path == Path::new("roster.csv")));
        assert_eq!(cli.client.server.as_deref(), Some("http://imports.internal:9000"));
        assert_eq!(cli.client.config, PathBuf::from("/tmp/client.toml"));
    }

    #[test]
    fn test_load_client_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(
            &path,
            r#"
server_url = "http://imports.internal:9000"

[policy]
chunk_size = 1048576
poll_interval_ms = 250
"#,
        )
        .unwrap();

        let config = load_client_config(&path).unwrap();
        assert_eq!(config.server_url, "http://imports.internal:9000");
        assert_eq!(config.policy.chunk_size, 1024 * 1024);
        assert_eq!(config.policy.poll_interval_ms, 250);
        assert_eq!(
            config.policy.single_shot_threshold,
            TransferPolicy::default().single_shot_threshold
        );
    }

    #[test]
    fn test_load_client_config_rejects_invalid_policy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, "[policy]\nchunk_size = 0\n").unwrap();

        let err = load_client_config(&path).unwrap_err();
        assert!(err.to_string().contains("invalid client configuration"));
    }

    #[test]
    fn test_server_flag_overrides_config() {
        let dir = TempDir::new().unwrap();
        let args = ClientArgs {
            config: dir.path().join("missing.toml"),
            server: Some("http://override:1234".to_string()),
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.server_url, "http://override:1234");
    }

    #[test]
    fn test_describe_chunked_plan() {
        let policy = TransferPolicy {
            single_shot_threshold: 10,
            chunk_size: 10,
            max_file_size: 100,
            ..TransferPolicy::default()
        };
        let lines = describe_plan(&policy.plan(25).unwrap());

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Chunked:"));
        assert!(lines[0].contains("3 chunks"));
        assert!(lines[3].contains("20..25"));
    }

    #[test]
    fn test_describe_single_shot_plan() {
        let policy = TransferPolicy::for_testing();
        let lines = describe_plan(&policy.plan(16).unwrap());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Single request"));
    }
}
