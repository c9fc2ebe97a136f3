//! fenced binary: option parsing, logging and process setup.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use mimalloc::MiMalloc;

use fenced::constants::{MIN_OVERRIDE_TIME, OOM_ADJ};
use fenced::daemon::{self, Daemon, LockFile};
use fenced::Config;

/// Global allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "fenced")]
#[command(version = VERSION)]
#[command(about = "Cluster fencing coordinator daemon")]
#[command(allow_negative_numbers = true)]
struct Cli {
    /// Enable debugging output, log to stderr
    #[arg(short = 'D')]
    debug: bool,

    /// groupd compatibility mode (0 = off, 1 or 2 = legacy groupd)
    #[arg(short = 'g', value_name = "NUM")]
    groupd_compat: Option<u8>,

    /// All nodes are in a clean state to start
    #[arg(short = 'c')]
    clean_start: bool,

    /// Post-join fencing delay in seconds (-1 = forever)
    #[arg(short = 'j', value_name = "SECS")]
    post_join_delay: Option<i32>,

    /// Post-fail fencing delay in seconds (-1 = forever)
    #[arg(short = 'f', value_name = "SECS")]
    post_fail_delay: Option<i32>,

    /// Override time in seconds (minimum 3)
    #[arg(short = 'R', value_name = "SECS")]
    override_time: Option<i32>,

    /// Override path (FIFO)
    #[arg(short = 'O', value_name = "PATH")]
    override_path: Option<PathBuf>,
}

impl Cli {
    /// Command-line values win over file and environment.
    fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.groupd_compat {
            config.groupd_compat = mode;
        }
        if self.clean_start {
            config.clean_start = true;
        }
        if let Some(secs) = self.post_join_delay {
            config.post_join_delay = secs;
        }
        if let Some(secs) = self.post_fail_delay {
            config.post_fail_delay = secs;
        }
        if let Some(secs) = self.override_time {
            config.override_time = secs.max(MIN_OVERRIDE_TIME);
        }
        if let Some(path) = &self.override_path {
            config.override_path.clone_from(path);
        }
    }
}

fn init_logging(debug: bool, log_path: &Path) {
    if debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .target(env_logger::Target::Stderr)
            .format_timestamp_secs()
            .init();
        return;
    }

    let log_file = log_path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
        });
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    match log_file {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(ref e) => {
            eprintln!("fenced: cannot open log file {}: {e}; logging to stderr", log_path.display());
            builder.target(env_logger::Target::Stderr);
        }
    }
    builder.init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    cli.apply(&mut config);
    config.normalize();
    if config.membership_socket.is_none() {
        bail!("membership_socket is not set; fenced needs a membership provider");
    }

    init_logging(cli.debug, &config.log_file);
    log::info!("fenced {} starting", VERSION);

    let _lock = LockFile::acquire(&config.lock_file)?;
    daemon::set_oom_adj(OOM_ADJ);

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::signal::SIGTERM, Arc::clone(&shutdown))?;

    let mut daemon = Daemon::new(config, shutdown)?;
    daemon.run()
}
