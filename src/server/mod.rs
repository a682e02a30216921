//! Repository re-serving HTTP endpoint (spec §4.9).
//!
//! Grounded on the actix/actix-web/flate2 combination used by the
//! `dumnati` Cincinnati-metadata server in the reference pack, generalised
//! from a JSON graph endpoint to a raw-object re-server sitting in front
//! of a bare OSTree repository.

mod dispatch;
mod idle;
mod listen;

pub use dispatch::dispatch;
pub use idle::IdleMonitor;
pub use listen::{bind_listener, ListenError};

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicUsize};

use actix_web::{web, App, HttpServer};

/// Configuration for one repo-server process (spec's "CLI surface (repo
/// server)").
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub repo_path: PathBuf,
    pub root_prefix: String,
    pub serve_remote: String,
    pub idle_timeout_secs: Option<u64>,
}

/// Shared, mutable-by-atomics state consulted by every request handler and
/// by the idle monitor.
pub struct ServerState {
    pub config: ServerConfig,
    pub pending_requests: AtomicUsize,
    pub last_activity_unix: AtomicI64,
}

impl ServerState {
    pub fn new(config: ServerConfig, now_unix: i64) -> Self {
        ServerState {
            config,
            pending_requests: AtomicUsize::new(0),
            last_activity_unix: AtomicI64::new(now_unix),
        }
    }

    pub fn touch(&self, now_unix: i64) {
        self.last_activity_unix
            .store(now_unix, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn begin_request(&self, now_unix: i64) {
        self.pending_requests
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.touch(now_unix);
        crate::metrics::REPO_SERVER_ACTIVE_REQUESTS.inc();
    }

    pub fn end_request(&self, now_unix: i64) {
        self.pending_requests
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        self.touch(now_unix);
        crate::metrics::REPO_SERVER_ACTIVE_REQUESTS.dec();
    }

    /// `pending == 0 && now - last_activity > timeout_seconds` (spec §4.9).
    pub fn idle_expired(&self, now_unix: i64) -> bool {
        let Some(timeout) = self.config.idle_timeout_secs else {
            return false;
        };
        let pending = self.pending_requests.load(std::sync::atomic::Ordering::SeqCst);
        if pending != 0 {
            return false;
        }
        let last = self.last_activity_unix.load(std::sync::atomic::Ordering::SeqCst);
        now_unix - last > timeout as i64
    }
}

/// Build and run the server on an already-bound listener, until the idle
/// monitor decides to shut it down (or the process is killed).
pub async fn run(state: std::sync::Arc<ServerState>, listener: std::net::TcpListener) -> std::io::Result<()> {
    let idle = IdleMonitor::spawn(state.clone());

    let data = web::Data::from(state);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .default_service(web::route().to(dispatch))
    })
    .listen(listener)?
    .run();

    let result = server.await;
    idle.stop();
    result
}
