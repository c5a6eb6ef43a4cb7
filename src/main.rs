//! TapTap Community Monitor
//!
//! Polls a TapTap game community for new topics and reviews, keeping a
//! deduplicated history across runs.
//!
//! Usage:
//!   taptap-monitor                         # Poll every 30 minutes
//!   taptap-monitor --interval 0            # Single fetch cycle
//!   taptap-monitor --app-id 236096 --data-file data/custom.json
//!   taptap-monitor --visible               # Show the browser (debugging)

use anyhow::Result;
use std::env;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use taptap_monitor::browser::BrowserlessRenderer;
use taptap_monitor::config::Config;
use taptap_monitor::monitor::Monitor;
use taptap_monitor::store::Store;

/// Command-line arguments
struct Args {
    /// Poll interval in minutes; 0 runs a single cycle
    interval: Option<u64>,
    /// Monitored app id
    app_id: Option<String>,
    /// Snapshot file path override
    data_file: Option<String>,
    /// Optional TOML config file
    config: Option<String>,
    /// Show the browser window instead of running headless
    visible: bool,
    /// Show help
    help: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut result = Args {
            interval: None,
            app_id: None,
            data_file: None,
            config: None,
            visible: false,
            help: false,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--interval" | "-i" => {
                    i += 1;
                    if i < args.len() {
                        result.interval = args[i].parse().ok();
                    }
                }
                "--app-id" | "-a" => {
                    i += 1;
                    if i < args.len() {
                        result.app_id = Some(args[i].clone());
                    }
                }
                "--data-file" | "-d" => {
                    i += 1;
                    if i < args.len() {
                        result.data_file = Some(args[i].clone());
                    }
                }
                "--config" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        result.config = Some(args[i].clone());
                    }
                }
                "--visible" => result.visible = true,
                "--help" | "-h" => result.help = true,
                _ => {}
            }
            i += 1;
        }

        result
    }

    fn print_help() {
        println!("TapTap Community Monitor - incremental topic/review collection\n");
        println!("USAGE:");
        println!("  taptap-monitor [OPTIONS]\n");
        println!("OPTIONS:");
        println!("  --interval, -i MIN   Poll interval in minutes, 0 = single run (default: 30)");
        println!("  --app-id, -a ID      Monitored TapTap app id (default: 236096)");
        println!("  --data-file, -d PATH Snapshot file path (default: data/{{app_id}}_data.json)");
        println!("  --config, -c PATH    Load settings from a TOML file");
        println!("  --visible            Show the browser window (debugging)");
        println!("  --help, -h           Show this help message\n");
        println!("EXAMPLES:");
        println!("  taptap-monitor                          # Poll every 30 minutes");
        println!("  taptap-monitor --interval 0             # One cycle and exit");
        println!("  taptap-monitor -a 236096 -d data/party.json");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.help {
        Args::print_help();
        return Ok(());
    }

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration, then layer CLI overrides on top
    let mut config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(interval) = args.interval {
        config.monitor.poll_interval_minutes = interval;
    }
    if let Some(app_id) = args.app_id {
        config.monitor.app_id = app_id;
    }
    if let Some(data_file) = args.data_file {
        config.storage.data_file = Some(data_file);
    }
    if args.visible {
        config.browser.headless = false;
    }

    info!("Starting TapTap community monitor...");

    let data_file = config.data_file();
    let store = Store::load(&data_file, &config.monitor.app_id);

    let renderer = BrowserlessRenderer::new(&config.browser)?;
    let interval = config.monitor.poll_interval_minutes;

    let mut monitor = Monitor::new(renderer, store, config);
    monitor.run(interval).await
}
