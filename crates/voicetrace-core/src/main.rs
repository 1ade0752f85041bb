//! VoiceTrace CLI
//!
//! Command-line interface for the VoiceTrace execution tracer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use voicetrace::api::HttpServer;
use voicetrace::collector::seed::{self, SeedOptions};
use voicetrace::collector::CostModel;
use voicetrace::config::{Config, LoggingConfig, StoreConfig};
use voicetrace::models::{AggregateSummary, StatusFilter, Trace, TraceFilter};
use voicetrace::query::QueryService;
use voicetrace::store::TraceStore;

/// VoiceTrace - Execution tracing for voice-driven code generation
#[derive(Parser)]
#[command(name = "voicetrace")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "VOICETRACE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the query API server
    Serve {
        /// Address to bind to
        #[arg(long, env = "VOICETRACE_HOST")]
        host: Option<String>,

        /// HTTP API port
        #[arg(long, env = "VOICETRACE_HTTP_PORT")]
        http_port: Option<u16>,

        /// Prometheus exporter port
        #[arg(long, env = "VOICETRACE_METRICS_PORT")]
        metrics_port: Option<u16>,
    },

    /// Show aggregate statistics over the recent traces
    Summary,

    /// Query recent traces
    Traces {
        #[command(subcommand)]
        command: TracesCommands,
    },

    /// Generate synthetic traces into the record directory
    Seed {
        /// Number of traces to create
        #[arg(long, default_value = "100")]
        traces: usize,

        /// Probability that a trace fails
        #[arg(long, default_value = "0.1")]
        failure_rate: f64,

        /// Pricing key for language-model calls
        #[arg(long, default_value = "llama-3.3-70b-versatile")]
        llm_provider: String,

        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum TracesCommands {
    /// List recent traces, oldest first
    List {
        /// Case-insensitive substring of the query text
        #[arg(short, long)]
        query: Option<String>,

        /// Status filter (success, failed)
        #[arg(long)]
        status: Option<StatusFilter>,

        /// Maximum number of results (most recent kept)
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show trace details
    Show {
        /// Trace ID to display
        trace_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&config.logging, cli.verbose);

    let result = match cli.command {
        Commands::Serve {
            host,
            http_port,
            metrics_port,
        } => run_serve(config, host, http_port, metrics_port).await,
        Commands::Summary => run_summary(&config, cli.format).await,
        Commands::Traces { command } => run_traces(&config, command, cli.format).await,
        Commands::Seed {
            traces,
            failure_rate,
            llm_provider,
            seed,
        } => {
            let options = SeedOptions {
                traces,
                failure_rate,
                llm_provider,
                seed,
            };
            run_seed(&config, &options).await
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Install the subscriber: stderr in the configured format, plus a
/// daily-rotated JSON file when a log directory is set.
fn init_logging(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = config.format.eq_ignore_ascii_case("json");

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "voicetrace.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with(file_layer)
        .try_init()
        .ok();

    guard
}

/// Open the record directory and pull the newest records into the window
async fn open_store(config: &StoreConfig) -> Arc<TraceStore> {
    let store = TraceStore::json_dir(&config.directory, config.window_size);
    let loaded = store.load_recent(config.window_size).await;
    info!(loaded, directory = %config.directory.display(), "Trace records loaded");
    Arc::new(store)
}

async fn run_serve(
    config: Config,
    host: Option<String>,
    http_port: Option<u16>,
    metrics_port: Option<u16>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or(config.server.host);
    let http_port = http_port.unwrap_or(config.server.http_port);

    if let Some(port) = metrics_port.or(config.server.metrics_port) {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid metrics address {host}:{port}"))?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let store = Arc::new(TraceStore::from_config(&config.store).await);
    info!(
        location = %store.location(),
        window = store.capacity(),
        loaded = store.len(),
        "Trace store ready"
    );

    let addr = format!("{host}:{http_port}");
    HttpServer::new(QueryService::new(store)).serve(&addr).await?;

    info!("Server stopped");
    Ok(())
}

async fn run_summary(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let queries = QueryService::new(open_store(&config.store).await);
    let summary = queries.summary();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_summary(&summary),
    }
    Ok(())
}

async fn run_traces(
    config: &Config,
    command: TracesCommands,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let queries = QueryService::new(open_store(&config.store).await);

    match command {
        TracesCommands::List {
            query,
            status,
            limit,
        } => {
            let filter = TraceFilter {
                text: query,
                status,
                limit: Some(limit),
            };
            let traces = queries.list(&filter);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&traces)?),
                OutputFormat::Text => print_trace_list(&traces),
            }
        }
        TracesCommands::Show { trace_id } => {
            let trace = queries
                .detail(&trace_id)
                .with_context(|| format!("trace {trace_id} not found in the recent window"))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&trace)?),
                OutputFormat::Text => print_trace(&trace),
            }
        }
    }
    Ok(())
}

async fn run_seed(config: &Config, options: &SeedOptions) -> anyhow::Result<()> {
    let costs = Arc::new(CostModel::from_config(&config.pricing));
    let store = TraceStore::json_dir(&config.store.directory, config.store.window_size);

    let count = seed::seed(&store, &costs, options).await;
    println!(
        "Seeded {count} traces into {}",
        config.store.directory.display()
    );
    Ok(())
}

fn print_summary(summary: &AggregateSummary) {
    println!("Requests:     {}", summary.total_requests);
    println!(
        "Succeeded:    {} ({:.1}%)",
        summary.successful_requests,
        summary.success_rate() * 100.0
    );
    println!("Failed:       {}", summary.failed_requests);
    println!("Tokens:       {}", summary.total_tokens);
    println!("Cost:         {}", summary.total_cost);
    println!("Avg latency:  {:.1} ms", summary.average_latency_ms);
    println!("Stages used:  {}", summary.distinct_stage_names_used);
    println!("Tools used:   {}", summary.distinct_tool_names_used);
}

fn print_trace_list(traces: &[Trace]) {
    if traces.is_empty() {
        println!("No traces found");
        return;
    }

    println!(
        "{:<36}  {:<19}  {:<7}  {:>8}  {:>12}  {:>10}  QUERY",
        "ID", "STARTED", "STATUS", "TOKENS", "COST", "LATENCY"
    );
    for trace in traces {
        println!(
            "{:<36}  {:<19}  {:<7}  {:>8}  {:>12}  {:>8.1}ms  {}",
            trace.id,
            trace.started_at.format("%Y-%m-%d %H:%M:%S"),
            if trace.success { "ok" } else { "failed" },
            trace.total_tokens,
            trace.total_cost.to_string(),
            trace.total_latency_ms,
            trace.query_text
        );
    }
}

fn print_trace(trace: &Trace) {
    println!("Trace {}", trace.id);
    println!("  Query:    {}", trace.query_text);
    println!("  Started:  {}", trace.started_at.to_rfc3339());
    println!("  Status:   {}", if trace.success { "ok" } else { "failed" });
    if let Some(error) = &trace.error_message {
        println!("  Error:    {error}");
    }
    println!("  Tokens:   {}", trace.total_tokens);
    println!("  Cost:     {}", trace.total_cost);
    println!("  Latency:  {:.1} ms", trace.total_latency_ms);
    println!("  Spans:    {}", trace.span_count());

    for stage in &trace.stage_spans {
        println!(
            "  [{}] {} {} {:.1}ms tokens={} cost={}",
            stage.span.sequence_index,
            if stage.span.success { "+" } else { "x" },
            stage.name(),
            stage.span.duration_ms().unwrap_or(0.0),
            stage.span.token_count,
            stage.cost
        );
        if let Some(error) = &stage.span.error_message {
            println!("        error: {error}");
        }
        if !stage.tools.is_empty() {
            println!("        tools: {}", stage.tools_used().join(", "));
        }
        for tool in &stage.tools {
            println!(
                "      [{}] {} {} via {} {:.1}ms in={} out={} cost={}",
                tool.span.sequence_index,
                if tool.span.success { "+" } else { "x" },
                tool.name(),
                tool.provider,
                tool.span.duration_ms().unwrap_or(0.0),
                tool.input_tokens,
                tool.output_tokens,
                tool.cost
            );
        }
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "voicetrace", &mut io::stdout());
}
