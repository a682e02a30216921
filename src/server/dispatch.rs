//! Path dispatch and object serving (spec §4.9 "Request dispatch").

use std::path::{Path, PathBuf};

use actix_web::http::header::LOCATION;
use actix_web::{web, HttpRequest, HttpResponse};
use once_cell::sync::Lazy;

use super::ServerState;
use crate::metrics;

const PASSTHROUGH_OBJECT_EXTS: &[&str] = &[
    ".commit",
    ".commitmeta",
    ".dirmeta",
    ".dirtree",
    ".sig",
    ".sizes2",
];

/// The document served for `/config`: a synthesized archive-mode repo
/// config, never the real bare-repo config (which may carry remote
/// credentials). Built once and reused for every request.
static SYNTHETIC_CONFIG: Lazy<String> = Lazy::new(|| {
    "[core]\nrepo_version=1\nmode=archive-z2\n".to_string()
});

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub async fn dispatch(req: HttpRequest, state: web::Data<ServerState>) -> HttpResponse {
    state.begin_request(now_unix());
    let response = handle(&req, &state).await;
    state.end_request(now_unix());
    response
}

async fn handle(req: &HttpRequest, state: &ServerState) -> HttpResponse {
    let Some(relative) = req.path().strip_prefix(&state.config.root_prefix) else {
        return HttpResponse::NotFound().finish();
    };
    if relative.contains("..") {
        return HttpResponse::Forbidden().finish();
    }
    let relative = relative.trim_start_matches('/');

    if let Some(rest) = relative.strip_prefix("objects/") {
        return serve_object(state, rest).await;
    }
    if relative == "config" {
        return HttpResponse::Ok()
            .content_type("text/plain")
            .body(SYNTHETIC_CONFIG.as_str());
    }
    if relative == "summary" || relative == "summary.sig" {
        return serve_summary(state, relative).await;
    }
    if let Some(rest) = relative.strip_prefix("refs/heads/") {
        return serve_ref(state, rest);
    }
    if relative.starts_with("deltas/") || relative.starts_with("extensions/") {
        return serve_file_as_is(&state.config.repo_path.join(relative)).await;
    }
    HttpResponse::NotFound().finish()
}

async fn serve_object(state: &ServerState, rest: &str) -> HttpResponse {
    let Some((prefix, filename)) = rest.split_once('/') else {
        return HttpResponse::NotFound().finish();
    };
    let disk_path = state.config.repo_path.join("objects").join(prefix).join(filename);

    if filename.ends_with(".filez") {
        return serve_filez(disk_path).await;
    }
    if PASSTHROUGH_OBJECT_EXTS.iter().any(|ext| filename.ends_with(ext)) {
        return serve_file_as_is(&disk_path).await;
    }
    HttpResponse::NotFound().finish()
}

/// Recompress a `.filez` object on the fly at zlib level 2, streaming
/// chunks through a capacity-1 channel so the reading thread blocks
/// (pauses) until the HTTP layer has drained the previous chunk
/// (spec §5 backpressure).
async fn serve_filez(path: PathBuf) -> HttpResponse {
    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Vec<u8>>>(1);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = recompress_into(&path, &tx) {
            let _ = tx.blocking_send(Err(e));
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        let mapped = item
            .map(web::Bytes::from)
            .map_err(actix_web::error::ErrorInternalServerError);
        Some((mapped, rx))
    });

    HttpResponse::Ok()
        .content_type("application/octet-stream")
        .streaming(stream)
}

/// Chunk size bounded to `[1 KiB, 2 MiB]` per spec; 64 KiB is a
/// comfortable middle value.
const RECOMPRESS_CHUNK_BYTES: usize = 64 * 1024;

fn recompress_into(path: &Path, tx: &tokio::sync::mpsc::Sender<std::io::Result<Vec<u8>>>) -> std::io::Result<()> {
    use flate2::read::ZlibDecoder;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};

    let file = std::fs::File::open(path)?;
    let mut decoder = ZlibDecoder::new(file);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(2));
    let mut buf = vec![0u8; RECOMPRESS_CHUNK_BYTES];

    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n])?;
        let chunk = std::mem::take(encoder.get_mut());
        if !chunk.is_empty() {
            metrics::REPO_SERVER_BYTES_SERVED.inc_by(chunk.len() as u64);
            if tx.blocking_send(Ok(chunk)).is_err() {
                return Ok(());
            }
        }
    }
    let tail = encoder.finish()?;
    if !tail.is_empty() {
        metrics::REPO_SERVER_BYTES_SERVED.inc_by(tail.len() as u64);
        let _ = tx.blocking_send(Ok(tail));
    }
    Ok(())
}

/// Serve from disk; regenerate first if the summary hasn't been written
/// yet, then wait a second so If-Modified-Since-based clients at
/// second resolution can't mistake the new file for a cached one.
async fn serve_summary(state: &ServerState, name: &str) -> HttpResponse {
    let summary_path = state.config.repo_path.join(name);
    if !summary_path.exists() {
        let repo_path = state.config.repo_path.clone();
        let regenerated = web::block(move || -> anyhow::Result<()> {
            let repo = crate::repo::Repository::open(&repo_path)?;
            repo.regenerate_summary()
        })
        .await;
        match regenerated {
            Ok(Ok(())) => tokio::time::sleep(std::time::Duration::from_secs(1)).await,
            _ => return HttpResponse::NotFound().finish(),
        }
    }
    serve_file_as_is(&summary_path).await
}

/// Serve a local head if present; otherwise redirect to the configured
/// remote's matching ref, so server-side remote refs look like local
/// heads to clients (spec §4.9).
fn serve_ref(state: &ServerState, rest: &str) -> HttpResponse {
    let heads_path = state.config.repo_path.join("refs/heads").join(rest);
    if heads_path.exists() {
        return HttpResponse::Ok().body(std::fs::read(&heads_path).unwrap_or_default());
    }
    let location = format!(
        "{}/refs/remotes/{}/{}",
        state.config.root_prefix.trim_end_matches('/'),
        state.config.serve_remote,
        rest
    );
    HttpResponse::Found().insert_header((LOCATION, location)).finish()
}

async fn serve_file_as_is(path: &Path) -> HttpResponse {
    let path = path.to_path_buf();
    match web::block(move || std::fs::read(&path)).await {
        Ok(Ok(bytes)) => {
            metrics::REPO_SERVER_BYTES_SERVED.inc_by(bytes.len() as u64);
            HttpResponse::Ok().content_type("application/octet-stream").body(bytes)
        }
        _ => HttpResponse::NotFound().finish(),
    }
}
