//! deskpilot CLI
//!
//! Runs the reconciliation robot against the driven application, or one of
//! its stages on its own.
//!
//! Usage:
//!   deskpilot run                      # export, load, save, search, write back
//!   deskpilot export                   # only write today's pending CSV
//!   deskpilot search --cedula 1032456789
//!   deskpilot dump --title "^PISCO"    # log the control tree of a window

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deskpilot::descriptor::TitleMatch;
use deskpilot::export::export_pending;
use deskpilot::session::DEFAULT_CRITERION_INDEX;
use deskpilot::{create_window_system, Outcome, RobotConfig, Session, SheetsStore, WindowQuery};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod logging;

const CONFIG_FILE: &str = "deskpilot.yaml";
const DUMP_LIMIT: usize = 200;

#[derive(Parser, Debug)]
#[command(
    name = "deskpilot",
    version,
    about = "Drives the PISCO desktop application and reconciles its results with the services sheet"
)]
struct Cli {
    /// YAML configuration file. Defaults to ./deskpilot.yaml, then the user config directory.
    #[arg(long, global = true, env = "DESKPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `paths.base_dir` (exports and logs live under it).
    #[arg(long, global = true, env = "DESKPILOT_BASE_DIR")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Full run: export pending rows, bulk load and save, search each record, write back
    Run,
    /// Export pending rows to a CSV and print its path
    Export,
    /// Search one national ID on an already open main window
    Search {
        /// National ID of the deceased
        #[arg(long)]
        cedula: String,
        /// Item of the criterion selector to use
        #[arg(long, default_value_t = DEFAULT_CRITERION_INDEX)]
        criterion: usize,
    },
    /// Log the descendants of the first window whose title matches
    Dump {
        /// Title regex
        #[arg(long)]
        title: String,
        #[arg(long, default_value_t = DUMP_LIMIT)]
        limit: usize,
    },
}

fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("deskpilot").join(CONFIG_FILE))
        .filter(|path| path.exists())
}

fn load_config(cli: &Cli) -> Result<(RobotConfig, Option<PathBuf>)> {
    let path = config_path(cli.config.as_deref());
    let mut config = match &path {
        Some(path) => RobotConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            let mut config = RobotConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(base_dir) = &cli.base_dir {
        config.paths.base_dir = base_dir.clone();
    }
    Ok((config, path))
}

fn open_store(config: &RobotConfig) -> Result<SheetsStore> {
    SheetsStore::new(
        &config.store.spreadsheet_id,
        &config.store.sheet_name,
        &config.store.access_token,
    )
    .context("opening the services sheet")
}

fn open_session(config: &RobotConfig, cancel: CancellationToken) -> Result<Session> {
    let system = create_window_system().context("initialising window automation")?;
    Ok(Session::new(system, config.timings.clone(), cancel))
}

fn execute(command: Commands, config: RobotConfig, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Run => {
            config.validate_for_run()?;
            let mut store = open_store(&config)?;
            let session = open_session(&config, cancel)?;
            let report = deskpilot::run(&config, &session, &mut store).context("run failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Export => {
            let mut store = open_store(&config)?;
            let now = chrono::Local::now().naive_local();
            match export_pending(&mut store, &config.paths.output_dir(), now)? {
                Some(exported) => println!("{}", exported.csv_path.display()),
                None => println!("nothing pending"),
            }
        }
        Commands::Search { cedula, criterion } => {
            let session = open_session(&config, cancel)?;
            let main = session
                .wait_main_window(&config.app)
                .context("the main window is not open")?;
            match session.search_with_criterion(main, &cedula, criterion)? {
                Outcome::Success(order) => println!("found: {order}"),
                other => println!("{}", other.label()),
            }
        }
        Commands::Dump { title, limit } => {
            let pattern = regex::Regex::new(&title).context("invalid --title regex")?;
            let session = open_session(&config, cancel)?;
            let window = session
                .locator()
                .wait_window(
                    &WindowQuery::titled(TitleMatch::Pattern(pattern)),
                    session.timings().window_timeout,
                )?
                .with_context(|| format!("no visible window titled like '{title}'"))?;
            for line in session.locator().describe_tree(window, limit) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (config, config_file) = load_config(&cli)?;
    logging::init_logging(&config.paths.log_dir())?;
    match &config_file {
        Some(path) => info!("Configuration: {}", path.display()),
        None => warn!("No configuration file found; using defaults and environment"),
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received; stopping after the current step");
            on_signal.cancel();
        }
    });

    let command = cli.command;
    let outcome = tokio::task::spawn_blocking(move || execute(command, config, cancel))
        .await
        .context("worker thread panicked")?;
    if let Err(e) = &outcome {
        error!("{:#}", e);
    }
    outcome
}
