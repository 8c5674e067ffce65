use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use jobbus::broker::Broker;
use jobbus::client::BusClient;
use jobbus::config::{BrokerConfig, DEFAULT_RECONNECT_GRACE_SECS};
use jobbus::datastore::MemoryDataStore;
use jobbus::scheduler::JobSpec;
use jobbus::shutdown::install_shutdown_handler;

/// Ten years.
const MAX_RETENTION_HOURS: i64 = 87_600;

#[derive(Parser, Debug)]
#[command(name = "jobbus")]
#[command(version)]
#[command(about = "A job broker dispatching work to connected worker processes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the event bus
    Server(ServerArgs),

    /// Job submission commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the worker, bus and db endpoints
    #[arg(long, env = "CICD_EB_HOST_PORT", default_value = "4443")]
    port: u16,

    /// Port for the read-only inspection API (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Seconds a disconnected worker may take to reconnect before its jobs fail
    #[arg(long, default_value_t = DEFAULT_RECONNECT_GRACE_SECS)]
    reconnect_grace_secs: u64,

    /// Hours finished jobs are kept before being dropped
    #[arg(long, default_value = "12", value_parser = clap::value_parser!(i64).range(1..=MAX_RETENTION_HOURS))]
    retention_hours: i64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Broker address
    #[arg(long, short = 'a', default_value = "ws://127.0.0.1:4443")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Run a job immediately on the least loaded worker and wait for it
    Run(SubmitArgs),

    /// Queue a job for the next free worker and wait for it
    Queue(SubmitArgs),

    /// Ask the worker on a host to do housekeeping
    Housekeeping {
        /// Host name of the target worker
        #[arg(long)]
        host: String,

        /// Options forwarded to the worker (JSON)
        #[arg(long, default_value = "{}")]
        options: String,
    },
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    /// Job name understood by the workers
    #[arg(long)]
    name: String,

    /// Only run on a worker with this host name
    #[arg(long)]
    host: Option<String>,

    /// Answer as soon as the job has started in the background
    #[arg(long)]
    background: bool,

    /// Job options forwarded to the worker (JSON)
    #[arg(long, default_value = "{}")]
    options: String,

    /// Free-form description
    #[arg(long)]
    description: Option<String>,
}

fn parse_json(raw: &str) -> Result<Value, Box<dyn std::error::Error>> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON '{}': {}", raw, e).into())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let retention = chrono::Duration::try_hours(args.retention_hours)
        .ok_or_else(|| format!("retention of {} hours is out of range", args.retention_hours))?;
    let mut config = BrokerConfig::new(listen_addr)
        .with_reconnect_grace(Duration::from_secs(args.reconnect_grace_secs))
        .with_queue_retention(retention);
    if let Some(port) = args.dashboard_port {
        config = config.with_dashboard(format!("0.0.0.0:{}", port).parse()?);
    }

    let shutdown = install_shutdown_handler()?;
    let broker = Broker::new(config, Arc::new(MemoryDataStore::new()));
    broker.run(shutdown).await?;
    tracing::info!("Event bus stopped");
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job(client: ClientArgs, command: JobCommands) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/bus", client.addr.trim_end_matches('/'));
    let bus = BusClient::connect(&url).await?;

    let (event, data) = match command {
        JobCommands::Run(args) => ("run", submission(args)?),
        JobCommands::Queue(args) => ("queue", submission(args)?),
        JobCommands::Housekeeping { host, options } => (
            "housekeeping",
            json!({ "host": host, "options": parse_json(&options)? }),
        ),
    };

    let answer = bus.request(event, data).await?;
    bus.close().await;

    match answer {
        Ok(result) => {
            match client.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Table => print_table(event, &result),
            }
            Ok(())
        }
        Err(error) => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            eprintln!("Error: {} failed: {}", event, message);
            std::process::exit(1);
        }
    }
}

fn submission(args: SubmitArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut spec = JobSpec::new(args.name).with_options(parse_json(&args.options)?);
    if let Some(host) = args.host {
        spec = spec.on_host(host);
    }
    if args.background {
        spec = spec.background();
    }
    spec.description = args.description;
    Ok(serde_json::to_value(spec)?)
}

fn print_table(event: &str, result: &Value) {
    let field = |name: &str| {
        result
            .get(name)
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .unwrap_or_else(|| "-".to_string())
    };

    if event == "housekeeping" {
        println!("Housekeeping sent to worker {} on {}", field("id"), field("host"));
        return;
    }

    println!("{:<38} {:<6} {:<24} {:<20}", "JOB ID", "TYPE", "STATUS", "HOST");
    println!(
        "{:<38} {:<6} {:<24} {:<20}",
        field("id"),
        field("type"),
        field("status"),
        field("host")
    );
    if let Some(output) = result.get("result").filter(|v| !v.is_null()) {
        println!("Result: {}", output);
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Job { client, command } => handle_job(client, command).await,
    }
}
