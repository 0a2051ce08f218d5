pub mod aggregate;
pub mod config;
pub mod data;
pub mod error;
pub mod palette;
pub mod period;
pub mod projection;
pub mod query;
pub mod render;
pub mod server;
pub mod types;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
    /// Overrides `data_root` from the config file and the environment
    #[arg(long, value_name = "DIR")]
    data_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the national map and the three metro zooms as SVG files
    Render {
        #[command(flatten)]
        common: Common,
        /// Crime column to map (defaults to the first one)
        #[arg(long)]
        crime: Option<String>,
        /// Last period of the rolling year, YYYY-MM (defaults to the most recent selectable)
        #[arg(long)]
        anchor: Option<String>,
        /// Keep municipalities under the population floor
        #[arg(long)]
        no_floor: bool,
        #[arg(short, long, value_name = "DIR", default_value = "maps")]
        out_dir: PathBuf,
    },
    /// Serve the interactive dashboard
    Serve {
        #[command(flatten)]
        common: Common,
    },
    /// List the periods that can anchor a rolling year
    Periods {
        #[command(flatten)]
        common: Common,
    },
}

fn load_config(common: &Common) -> anyhow::Result<config::AppConfig> {
    let mut app_config = config::AppConfig::load_from_file(&common.config)?;
    app_config.resolve_data_root(common.data_root.clone());
    Ok(app_config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render { common, crime, anchor, no_floor, out_dir } => {
            let app_config = load_config(&common)?;
            let dataset = data::load_data(&app_config)?;

            let selection = query::Selection { crime, anchor, floor: Some(!no_floor) };
            let resolved = query::resolve(&dataset, &selection, app_config.render.population_floor)?;
            let rates = query::run(&dataset, &resolved)?;
            info!(
                crime = %resolved.crime,
                anchor = %resolved.anchor,
                floor = ?resolved.floor,
                municipalities = rates.len(),
                "aggregated rolling year"
            );

            let scene = render::MapScene::new(
                &dataset,
                &resolved.crime,
                &rates,
                app_config.render.no_data_color.clone(),
            );

            fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create output directory: {:?}", out_dir))?;
            for view in render::MapView::ALL {
                let path = out_dir.join(format!("{}.svg", view.slug()));
                let svg = scene.render(view, app_config.render.width, app_config.render.height);
                fs::write(&path, svg).with_context(|| format!("Failed to write {:?}", path))?;
                info!(view = view.subheading(), path = %path.display(), "map written");
            }
        }
        Commands::Serve { common } => {
            let app_config = load_config(&common)?;
            let dataset = data::load_data(&app_config)?;
            server::start_server(app_config, dataset).await?;
        }
        Commands::Periods { common } => {
            let app_config = load_config(&common)?;
            let file = fs::File::open(app_config.crimes_path())
                .with_context(|| format!("Failed to open crime CSV: {:?}", app_config.crimes_path()))?;
            let crimes = data::read_crimes(file, &app_config.input.crime_columns)?;
            let periods = period::distinct_periods(&crimes);
            for anchor in period::selectable_anchors(&periods) {
                println!("{anchor}");
            }
        }
    }

    Ok(())
}
