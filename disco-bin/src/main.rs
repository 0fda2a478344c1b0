use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use disco_core::{
    auth::ApiKey,
    config::ClientCfg,
    http_client::{ApiRequest, HttpClient},
    model::{EnvVariables, GithubApps, LogItem},
    stream::{EventStreamClient, MessageEvent, StreamConsumer},
    transport::TransportError,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "disco command-line client", long_about = None)]
struct Cli {
    /// Host of the disco server, e.g. disco.example.com
    #[arg(long, env = "DISCO_HOST")]
    host: String,
    #[arg(long, env = "DISCO_API_KEY", hide_env_values = true)]
    api_key: String,
    #[arg(long, default_value = "https")]
    scheme: String,
    /// Client tuning file (JSON or TOML): timeouts, reconnect delay
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream logs
    Logs {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        service: Option<String>,
        /// Stop streaming after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Environment variables
    #[command(subcommand)]
    Env(EnvCommands),
    /// Github integration
    #[command(subcommand)]
    Github(GithubCommands),
}

#[derive(Subcommand)]
enum EnvCommands {
    /// List the env vars of a project
    List {
        #[arg(long)]
        project: String,
    },
}

#[derive(Subcommand)]
enum GithubCommands {
    #[command(subcommand)]
    Apps(GithubAppsCommands),
}

#[derive(Subcommand)]
enum GithubAppsCommands {
    /// List Github apps
    List,
}

/// Prints service log lines; everything else is skipped.
struct LogPrinter;

impl StreamConsumer for LogPrinter {
    fn on_output(&mut self, event: MessageEvent) {
        match event.json::<LogItem>() {
            Ok(item) if item.is_service_output() => println!("{}", item.display_line()),
            Ok(_) => {}
            Err(e) => tracing::warn!(error.message = %e, "skipping malformed log entry"),
        }
    }

    fn on_stats(&mut self, event: MessageEvent) {
        tracing::debug!(data = %event.data, "stats");
    }

    fn on_error(&mut self, error: &TransportError) {
        // the transport may still recover, so only warn
        eprintln!("Warning: {error}");
    }
}

fn logs_url(base: &str, project: Option<&str>, service: Option<&str>) -> anyhow::Result<String> {
    let mut url = format!("{base}/.disco/logs");
    match (project, service) {
        (None, Some(_)) => bail!("Must specify project when specifying service"),
        (Some(p), Some(s)) => url = format!("{url}/{p}/{s}"),
        (Some(p), None) => url = format!("{url}/{p}"),
        (None, None) => {}
    }
    Ok(url)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => ClientCfg::from_path(path)?,
        None => ClientCfg::default(),
    };
    let api_key = ApiKey::new(cli.api_key);
    let base = format!("{}://{}", cli.scheme, cli.host);

    match cli.command {
        Commands::Logs {
            project,
            service,
            timeout_secs,
        } => {
            let url = logs_url(&base, project.as_deref(), service.as_deref())?;
            let client = EventStreamClient::from_cfg(&cfg)?;
            let mut session = client.open(&url, &api_key, LogPrinter)?;

            let deadline = async {
                match timeout_secs {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => std::future::pending().await,
                }
            };
            let finished = tokio::select! {
                _ = &mut session => true,
                _ = deadline => false,
                _ = tokio::signal::ctrl_c() => false,
            };
            if !finished {
                session.close();
                session.await;
            }
        }
        Commands::Env(EnvCommands::List { project }) => {
            println!("Fetching env variables for {project}");
            let http = HttpClient::from_cfg(&cfg.http)?;
            let url = format!("{base}/.disco/projects/{project}/env");
            let resp = http
                .send(&api_key, ApiRequest::get(url).expect_statuses([200, 404]))
                .await?;
            if resp.status().as_u16() == 404 {
                println!();
                return Ok(());
            }
            let data: EnvVariables = resp.json().await?;
            for variable in data.env_variables {
                println!("{}={}", variable.name, variable.value);
            }
        }
        Commands::Github(GithubCommands::Apps(GithubAppsCommands::List)) => {
            let http = HttpClient::from_cfg(&cfg.http)?;
            let url = format!("{base}/api/github-apps");
            let resp = http.send(&api_key, ApiRequest::get(url)).await?;
            let data: GithubApps = resp.json().await?;
            for app in data.github_apps {
                println!("{} ({})", app.owner.login, app.owner.kind);
            }
        }
    }

    Ok(())
}
