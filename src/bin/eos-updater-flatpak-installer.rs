//! Post-boot flatpak action runner (spec §4.8).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use eos_updater::flatpak::{self, CliFlatpakBackend, Mode};
use structopt::StructOpt;

/// Highest to lowest priority, mirroring the config layering in
/// `config.rs`: admin overrides win, the vendor-shipped directory is
/// consulted last.
const ACTION_LIST_DIRS: &[&str] = &[
    "/etc/eos-updater/flatpak-autoinstall.d",
    "/run/eos-updater/flatpak-autoinstall.d",
    "/usr/share/eos-updater/flatpak-autoinstall.d",
];

const COUNTERS_PATH: &str = "/var/lib/eos-updater/flatpak-autoinstall-progress.ini";

#[derive(Clone, Copy, Debug)]
struct ModeArg(Mode);

impl FromStr for ModeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "perform" => Ok(ModeArg(Mode::Perform)),
            "stamp" => Ok(ModeArg(Mode::Stamp)),
            "check" => Ok(ModeArg(Mode::Check)),
            other => Err(format!("unknown mode '{}', expected perform/stamp/check", other)),
        }
    }
}

#[derive(StructOpt)]
#[structopt(name = "eos-updater-flatpak-installer", about = "Apply autoinstalled flatpak actions")]
struct Opts {
    #[structopt(long, default_value = "perform")]
    mode: ModeArg,

    #[structopt(long)]
    remote: Option<String>,
}

const EXIT_SUCCESS: i32 = 0;
const EXIT_GENERIC_FAILURE: i32 = 1;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts = Opts::from_args();

    let dirs: Vec<&Path> = ACTION_LIST_DIRS.iter().map(Path::new).collect();
    let action_lists = match flatpak::load_action_lists(&dirs) {
        Ok(lists) => lists,
        Err(e) => {
            log::error!("failed to load flatpak action lists: {:#}", e);
            std::process::exit(EXIT_GENERIC_FAILURE);
        }
    };

    let counters_path = PathBuf::from(COUNTERS_PATH);
    let mut counters = match flatpak::load_counters(&counters_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load flatpak progress counters: {:#}", e);
            std::process::exit(EXIT_GENERIC_FAILURE);
        }
    };

    let backend = CliFlatpakBackend;
    let report = flatpak::run(
        &action_lists,
        &mut counters,
        opts.mode.0,
        &backend,
        opts.remote.as_deref(),
    );

    if !matches!(opts.mode.0, Mode::Check) {
        if let Err(e) = flatpak::save_counters(&counters_path, &counters) {
            log::warn!("failed to persist flatpak progress counters: {:#}", e);
        }
    }

    match report {
        Ok(report) => {
            log::info!("applied {} flatpak ref action(s)", report.applied.len());
            std::process::exit(EXIT_SUCCESS);
        }
        Err(e) => {
            log::error!("flatpak action run failed: {}", e);
            std::process::exit(EXIT_GENERIC_FAILURE);
        }
    }
}
