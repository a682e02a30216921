//! The long-running D-Bus update daemon.
//!
//! Splits the state machine (an actor running on its own arbiter) from
//! a synchronous D-Bus front-end: a blocking zbus 1.x object-server
//! loop running on its own thread, forwarding calls to the actor's
//! mailbox.

use std::sync::Arc;

use eos_updater::config::Config;
use eos_updater::dbus::{self, Updater};
use eos_updater::state_machine::{SharedProgress, UpdaterActor, UpdaterSettings};
use eos_updater::util;
use structopt::StructOpt;
use zbus::fdo;

#[derive(StructOpt)]
#[structopt(name = "eos-updater", about = "OSTree update daemon")]
struct Opts {
    #[structopt(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::from_args();
    init_logging(opts.verbose);

    let config = Arc::new(Config::system_default());
    let settings = UpdaterSettings::from_config(&config, Vec::new())?;

    let system = actix::System::new();
    let actor = UpdaterActor::new(config, settings);
    let progress = actor.progress.clone();
    let addr = system.block_on(async move { actor.start() });

    std::thread::spawn(move || {
        if let Err(e) = run_dbus_loop(addr, progress) {
            log::error!("D-Bus loop exited: {:#}", e);
            std::process::exit(1);
        }
    });

    system.run()?;
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run_dbus_loop(addr: actix::Addr<UpdaterActor>, progress: SharedProgress) -> anyhow::Result<()> {
    let connection = zbus::Connection::new_system()?;
    fdo::DBusProxy::new(&connection)?
        .request_name(dbus::INTERFACE_NAME, fdo::RequestNameFlags::ReplaceExisting.into())?;

    let updater = Updater { actor: addr, progress };
    let mut object_server = zbus::ObjectServer::new(&connection);
    object_server.at(dbus::OBJECT_PATH, updater)?;

    util::notify_ready();
    log::info!("eos-updater ready, serving {}", dbus::OBJECT_PATH);

    loop {
        if let Err(e) = object_server.try_handle_next() {
            log::warn!("error handling D-Bus message: {}", e);
        }
    }
}
