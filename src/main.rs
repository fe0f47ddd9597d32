use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use saferoute::{advisory, config, data, export, map, render, server, types};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the API, the front-end and the rendered overlay tiles
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Render the incident markers to overlay map tiles
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Ask the AI service to classify an incident description
    Analyze {
        description: String,
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Ask the AI service for road safety advice on a topic
    Advice {
        topic: String,
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Export the reports as CSV
    Export {
        /// Output file; stdout when omitted
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("saferoute=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load_or_default(&config)?;
            let reports = data::load_reports(&app_config, Utc::now())?;
            let advisory = advisory::AdvisoryClient::from_config(&app_config.advisory);
            server::start_server(app_config, reports, advisory).await?;
        }
        Commands::Render { config } => {
            let app_config = config::AppConfig::load_or_default(&config)?;
            let reports: Arc<[types::AccidentReport]> =
                data::load_reports(&app_config, Utc::now())?.into();

            let mut sync = map::MapSync::new(map::MapView::from(&app_config.map), |_| {
                map::MarkerLayer::new()
            });
            sync.update(reports);
            let layer = sync
                .surface()
                .context("marker layer was not created")?;

            let summary = render::render_overlay(&app_config.render, layer)?;
            info!(
                tiles = summary.total_tiles(),
                dir = ?app_config.render.tile_dir,
                "render complete"
            );
        }
        Commands::Analyze { description, config } => {
            anyhow::ensure!(!description.trim().is_empty(), "description must not be empty");
            let app_config = config::AppConfig::load_or_default(&config)?;
            let client = advisory::AdvisoryClient::from_config(&app_config.advisory);
            let assessment = client.classify_incident(&description).await;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }
        Commands::Advice { topic, config } => {
            anyhow::ensure!(!topic.trim().is_empty(), "topic must not be empty");
            let app_config = config::AppConfig::load_or_default(&config)?;
            let client = advisory::AdvisoryClient::from_config(&app_config.advisory);
            println!("{}", client.get_advice(&topic).await);
        }
        Commands::Export { out, config } => {
            let app_config = config::AppConfig::load_or_default(&config)?;
            let reports = data::load_reports(&app_config, Utc::now())?;
            match out {
                Some(path) => {
                    export::write_reports_csv(&reports, &path)?;
                    info!(?path, count = reports.len(), "reports exported");
                }
                None => print!("{}", export::reports_to_csv(&reports)?),
            }
        }
    }

    Ok(())
}
