use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "guardctl")]
#[command(about = "Operator CLI for ingest-guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "GUARD_URL")]
    url: String,

    #[arg(short, long, env = "GUARD_API_KEY")]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Liveness, or every component with --detailed
    Health {
        #[arg(long)]
        detailed: bool,
    },
    /// Readiness as seen by an orchestrator
    Ready,
    /// List circuit breakers
    Circuits,
    /// Force a circuit open
    Open { name: String },
    /// Force a circuit closed
    Close { name: String },
    /// Manage fault scenarios
    Faults {
        #[command(subcommand)]
        action: FaultCommands,
    },
    /// Reload configuration from disk
    Reload,
    /// Begin graceful shutdown
    Shutdown,
}

#[derive(Subcommand)]
enum FaultCommands {
    /// List active scenarios
    List,
    /// Activate a named preset
    Inject {
        preset: String,
        #[arg(short, long, default_value_t = 60)]
        duration: u64,
    },
    /// Remove every active scenario
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert("x-api-key", HeaderValue::from_str(key)?);
    }

    let (method, path, body) = match cli.command {
        Commands::Health { detailed: false } => (Method::GET, "/health".to_string(), None),
        Commands::Health { detailed: true } => (Method::GET, "/health/detailed".to_string(), None),
        Commands::Ready => (Method::GET, "/ready?detailed=true".to_string(), None),
        Commands::Circuits => (Method::GET, "/admin/circuits".to_string(), None),
        Commands::Open { name } => (Method::POST, format!("/admin/circuits/{name}/open"), None),
        Commands::Close { name } => (Method::POST, format!("/admin/circuits/{name}/close"), None),
        Commands::Faults { action: FaultCommands::List } => (Method::GET, "/admin/faults".to_string(), None),
        Commands::Faults {
            action: FaultCommands::Inject { preset, duration },
        } => (
            Method::POST,
            "/admin/faults".to_string(),
            Some(json!({ "preset": preset, "duration_secs": duration })),
        ),
        Commands::Faults { action: FaultCommands::Clear } => (Method::DELETE, "/admin/faults".to_string(), None),
        Commands::Reload => (Method::POST, "/config/reload".to_string(), None),
        Commands::Shutdown => (Method::POST, "/admin/shutdown".to_string(), None),
    };

    let mut request = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let res = request.send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };

    if status.is_success() {
        println!("{rendered}");
        Ok(())
    } else {
        eprintln!("Error: guard returned status {status}");
        eprintln!("{rendered}");
        std::process::exit(1);
    }
}
