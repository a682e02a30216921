//! Periodic oneshot driver (spec §4.10/§6 "CLI surface (auto-driver)").

use std::path::PathBuf;
use std::sync::Arc;

use eos_updater::autodriver::{self, DriverOptions, DriverOutcome};
use eos_updater::config::Config;
use eos_updater::state_machine::UpdaterSettings;
use eos_updater::util;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "eos-autoupdater", about = "Drive the update daemon on a schedule")]
struct Opts {
    #[structopt(long)]
    force_update: bool,

    #[structopt(long)]
    force_fetch: bool,

    #[structopt(long)]
    from_volume: Option<PathBuf>,
}

const EXIT_SUCCESS: i32 = 0;
const EXIT_GENERIC_FAILURE: i32 = 1;
const EXIT_INVALID_ARGS: i32 = 2;
const EXIT_BAD_CONFIGURATION: i32 = 3;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::from_args();
    if opts.force_update && opts.force_fetch {
        log::error!("--force-update and --force-fetch are mutually exclusive");
        std::process::exit(EXIT_INVALID_ARGS);
    }

    let config = Arc::new(Config::system_default());
    let settings = match UpdaterSettings::from_config(&config, Vec::new()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("bad configuration: {:#}", e);
            std::process::exit(EXIT_BAD_CONFIGURATION);
        }
    };

    let remote_host = config
        .string("Download", "RemoteHost")
        .ok()
        .flatten()
        .unwrap_or_else(|| "updates.endlessm.com".to_string());

    let state_dir = PathBuf::from("/var/lib/eos-updater");
    let options = DriverOptions {
        force_update: opts.force_update,
        force_fetch: opts.force_fetch,
        from_volume: opts.from_volume,
        stamp_path: state_dir.join(util::STAMP_FILE_NAME),
        poll_results_path: state_dir.join(util::POLL_RESULTS_FILE_NAME),
    };

    let system = actix::System::new();
    let outcome = system.block_on(autodriver::run(config, settings, &remote_host, options));

    match outcome {
        DriverOutcome::Success => std::process::exit(EXIT_SUCCESS),
        DriverOutcome::Failure(message) => {
            log::error!("auto-update cycle failed: {}", message);
            std::process::exit(EXIT_GENERIC_FAILURE);
        }
    }
}
