//! Idle-timeout teardown (spec §4.9): exit the process once there are no
//! pending requests and the configured timeout has elapsed since the last
//! one finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::ServerState;

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct IdleMonitor {
    stop: Arc<AtomicBool>,
}

impl IdleMonitor {
    pub fn spawn(state: Arc<ServerState>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                if stop_flag.load(Ordering::SeqCst) {
                    return;
                }
                if state.idle_expired(now_unix()) {
                    log::info!("no requests within the idle timeout, exiting");
                    std::process::exit(0);
                }
            }
        });
        IdleMonitor { stop }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
