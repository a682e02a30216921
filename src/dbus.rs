//! D-Bus interface (spec §6): object path `/com/endlessm/Updater`,
//! interface `com.endlessm.Updater`.
//!
//! A thin `#[dbus_interface]` impl that forwards state-changing calls
//! to the actor over its mailbox and blocks on the (synchronous,
//! immediate) reply; properties are read directly off the actor's
//! `SharedProgress` handle, bypassing the mailbox entirely.

use std::path::PathBuf;

use actix::Addr;
use futures::executor;
use zbus::{dbus_interface, fdo};
use zvariant::OwnedValue;

use crate::state_machine::{Apply, Cancel, Fetch, Poll, PollVolume, SharedProgress, UpdaterActor};

pub const OBJECT_PATH: &str = "/com/endlessm/Updater";
pub const INTERFACE_NAME: &str = "com.endlessm.Updater";

pub struct Updater {
    pub actor: Addr<UpdaterActor>,
    pub progress: SharedProgress,
}

impl Updater {
    fn map_result(result: Result<(), crate::error::UpdaterError>) -> fdo::Result<()> {
        result.map_err(|e| fdo::Error::Failed(format!("{}", e)))
    }
}

#[dbus_interface(name = "com.endlessm.Updater")]
impl Updater {
    fn poll(&self) -> fdo::Result<()> {
        let reply = executor::block_on(self.actor.send(Poll))
            .map_err(|e| fdo::Error::Failed(format!("actor mailbox error: {}", e)))?;
        Self::map_result(reply)
    }

    fn poll_volume(&self, path: String) -> fdo::Result<()> {
        let reply = executor::block_on(self.actor.send(PollVolume { path: PathBuf::from(path) }))
            .map_err(|e| fdo::Error::Failed(format!("actor mailbox error: {}", e)))?;
        Self::map_result(reply)
    }

    fn fetch(&self) -> fdo::Result<()> {
        let reply = executor::block_on(self.actor.send(Fetch { force: false }))
            .map_err(|e| fdo::Error::Failed(format!("actor mailbox error: {}", e)))?;
        Self::map_result(reply)
    }

    fn fetch_full(&self, options: std::collections::HashMap<String, OwnedValue>) -> fdo::Result<()> {
        let force = options
            .get("force")
            .and_then(|v| bool::try_from(v.clone()).ok())
            .unwrap_or(false);
        let reply = executor::block_on(self.actor.send(Fetch { force }))
            .map_err(|e| fdo::Error::Failed(format!("actor mailbox error: {}", e)))?;
        Self::map_result(reply)
    }

    fn apply(&self) -> fdo::Result<()> {
        let reply = executor::block_on(self.actor.send(Apply))
            .map_err(|e| fdo::Error::Failed(format!("actor mailbox error: {}", e)))?;
        Self::map_result(reply)
    }

    fn cancel(&self) -> fdo::Result<()> {
        let reply = executor::block_on(self.actor.send(Cancel))
            .map_err(|e| fdo::Error::Failed(format!("actor mailbox error: {}", e)))?;
        Self::map_result(reply)
    }

    #[dbus_interface(property)]
    fn state(&self) -> u32 {
        self.progress.read().unwrap().state.as_u32()
    }

    #[dbus_interface(property)]
    fn error_name(&self) -> String {
        self.progress.read().unwrap().error_name.clone()
    }

    #[dbus_interface(property)]
    fn error_message(&self) -> String {
        self.progress.read().unwrap().error_message.clone()
    }

    #[dbus_interface(property)]
    fn update_id(&self) -> String {
        self.progress.read().unwrap().update_id.clone()
    }

    #[dbus_interface(property)]
    fn update_refspec(&self) -> String {
        self.progress.read().unwrap().update_refspec.clone()
    }

    #[dbus_interface(property)]
    fn original_refspec(&self) -> String {
        self.progress.read().unwrap().original_refspec.clone()
    }

    #[dbus_interface(property)]
    fn current_id(&self) -> String {
        self.progress.read().unwrap().current_id.clone()
    }

    #[dbus_interface(property)]
    fn update_flags(&self) -> u32 {
        self.progress.read().unwrap().update_flags
    }

    #[dbus_interface(property)]
    fn download_size(&self) -> u64 {
        self.progress.read().unwrap().download_size
    }

    #[dbus_interface(property)]
    fn downloaded_bytes(&self) -> u64 {
        self.progress.read().unwrap().downloaded_bytes
    }

    #[dbus_interface(property)]
    fn unpacked_size(&self) -> u64 {
        self.progress.read().unwrap().unpacked_size
    }

    #[dbus_interface(property)]
    fn version(&self) -> String {
        self.progress.read().unwrap().version.clone()
    }
}
