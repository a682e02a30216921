//! Repository re-serving HTTP endpoint (spec §4.9/§6 "CLI surface
//! (repo server)").

use std::path::PathBuf;
use std::sync::Arc;

use eos_updater::config::Config;
use eos_updater::server::{self, ServerConfig, ServerState};
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "eos-repo-server", about = "Re-serve an OSTree repository over HTTP")]
struct Opts {
    #[structopt(long)]
    local_port: Option<u16>,

    #[structopt(long)]
    timeout: Option<i64>,

    #[structopt(long, default_value = "eos")]
    serve_remote: String,

    #[structopt(long, parse(from_os_str))]
    port_file: Option<PathBuf>,

    #[structopt(long, parse(from_os_str))]
    config_file: Option<PathBuf>,
}

const EXIT_GENERIC_FAILURE: i32 = 1;
const EXIT_ADVERTISING_DISABLED: i32 = 4;
const EXIT_NO_LISTEN_SOCKETS: i32 = 5;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts = Opts::from_args();

    let config = match &opts.config_file {
        Some(path) => Config::new(vec![path.clone()]),
        None => Config::system_default(),
    };

    match config.bool("Local Network Updates", "AdvertiseUpdates", true) {
        Ok(true) => {}
        Ok(false) => {
            log::info!("advertising updates is disabled, nothing to serve");
            std::process::exit(EXIT_ADVERTISING_DISABLED);
        }
        Err(e) => {
            log::error!("failed to read configuration: {:#}", e);
            std::process::exit(EXIT_GENERIC_FAILURE);
        }
    }

    let listener = match server::bind_listener(opts.local_port, opts.port_file.as_deref()) {
        Ok(listener) => listener,
        Err(server::ListenError::AdvertisingDisabled) => std::process::exit(EXIT_ADVERTISING_DISABLED),
        Err(server::ListenError::NoListenSockets) => {
            log::error!("no listen sockets available");
            std::process::exit(EXIT_NO_LISTEN_SOCKETS);
        }
        Err(e) => {
            log::error!("failed to acquire a listen socket: {}", e);
            std::process::exit(EXIT_GENERIC_FAILURE);
        }
    };

    let idle_timeout_secs = opts.timeout.filter(|t| *t > 0).map(|t| t as u64);
    let state = Arc::new(ServerState::new(
        ServerConfig {
            repo_path: PathBuf::from("/ostree/repo"),
            root_prefix: String::new(),
            serve_remote: opts.serve_remote,
            idle_timeout_secs,
        },
        now_unix(),
    ));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start async runtime: {}", e);
            std::process::exit(EXIT_GENERIC_FAILURE);
        }
    };
    if let Err(e) = runtime.block_on(server::run(state, listener)) {
        log::error!("repo server exited with an error: {}", e);
        std::process::exit(EXIT_GENERIC_FAILURE);
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
