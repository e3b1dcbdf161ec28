//! ftp-volume-driver daemon entry point

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ftp_volume_driver::config::Config;
use ftp_volume_driver::driver::VolumeDriver;
use ftp_volume_driver::plugin;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: ftp-volume-driver [config.yaml]");
    eprintln!();
    eprintln!("ftp-volume-driver - Volume plugin mounting remote FTP directories");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file (built-in defaults if omitted)");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  ftp-volume-driver /etc/ftp-volume-driver/config.yaml");
}

/// Load the configuration file, or the built-in defaults when none is given
fn load_config(path: Option<&String>) -> ftp_volume_driver::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(&PathBuf::from(path))?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 || args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        print_usage();
        std::process::exit(1);
    }

    let config = match load_config(args.get(1)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ftp-volume-driver starting");
    info!("Volumes under {:?}, state in {:?}", config.driver.root, config.state.dir);

    let driver = Arc::new(VolumeDriver::from_config(&config));

    // Replay saved volumes before accepting requests
    match driver.restore(config.state.strict_restore) {
        Ok(count) => info!("{} volume(s) restored", count),
        Err(e) => {
            error!("Failed to restore state: {}", e);
            std::process::exit(1);
        }
    }

    // Set up signal handling for graceful shutdown
    let shutdown = Arc::new(Notify::new());
    let s = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        s.notify_one();
    })?;

    let socket = config.driver.socket_path();
    if let Err(e) = plugin::serve(driver.clone(), &socket, shutdown).await {
        error!("Plugin server on {:?} failed: {}", socket, e);
        std::process::exit(1);
    }

    info!("Shutting down");
    if let Err(e) = driver.shutdown() {
        error!("Failed to save state on shutdown: {}", e);
    }
    info!("State saved, exiting");

    Ok(())
}
