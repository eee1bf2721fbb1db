use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "routectl")]
#[command(about = "Management CLI for the prefix proxy admin API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "ROUTECTL_URL", default_value = "http://127.0.0.1:8475")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List routes and their backends
    List,
    /// Route a path prefix to a freshly provisioned backend
    Add { prefix: String },
    /// Show one route by its registration name
    Get { route: String },
    /// Remove one route by its registration name
    Delete { route: String },
    /// Re-enable every backend and drop all toxics
    Reset,
    /// Remove every route
    Clear,
    /// List the toxics of a route
    Toxics { route: String },
    /// Check proxy status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder().no_proxy().build()?;
    let base = cli.url.trim_end_matches('/');

    let request = match &cli.command {
        Commands::List => client.get(format!("{base}/routes")),
        Commands::Add { prefix } => client
            .post(format!("{base}/routes"))
            .json(&json!({ "prefix": prefix })),
        Commands::Get { route } => client.get(format!("{base}/routes/{route}")),
        Commands::Delete { route } => client.delete(format!("{base}/routes/{route}")),
        Commands::Reset => client.post(format!("{base}/routes/reset")),
        Commands::Clear => client.delete(format!("{base}/routes")),
        Commands::Toxics { route } => client.get(format!("{base}/routes/{route}/toxics")),
        Commands::Status => client.get(format!("{base}/status")),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
