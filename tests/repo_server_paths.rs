//! Repo server path-safety and object-serving invariants (spec §8
//! "for the repo server..."), driven through the public `dispatch`
//! handler with `actix_web::test`.

use std::sync::Arc;

use actix_web::{test, web, App};
use eos_updater::server::{dispatch, ServerConfig, ServerState};

fn make_state(repo_path: std::path::PathBuf) -> Arc<ServerState> {
    Arc::new(ServerState::new(
        ServerConfig {
            repo_path,
            root_prefix: String::new(),
            serve_remote: "eos".to_string(),
            idle_timeout_secs: None,
        },
        0,
    ))
}

#[actix_web::test]
async fn dotdot_path_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path().to_path_buf());
    let data = web::Data::from(state);
    let app = test::init_service(
        App::new()
            .app_data(data.clone())
            .default_service(web::route().to(dispatch)),
    )
    .await;

    let req = test::TestRequest::get().uri("/objects/../../etc/passwd").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
async fn unknown_path_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path().to_path_buf());
    let data = web::Data::from(state);
    let app = test::init_service(
        App::new()
            .app_data(data.clone())
            .default_service(web::route().to(dispatch)),
    )
    .await;

    let req = test::TestRequest::get().uri("/nonexistent").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn config_endpoint_is_synthesized_archive_mode() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path().to_path_buf());
    let data = web::Data::from(state);
    let app = test::init_service(
        App::new()
            .app_data(data.clone())
            .default_service(web::route().to(dispatch)),
    )
    .await;

    let req = test::TestRequest::get().uri("/config").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("mode=archive-z2"));
    assert!(text.contains("repo_version=1"));
    assert!(!text.contains("[remote"));
}

#[actix_web::test]
async fn missing_object_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path().to_path_buf());
    let data = web::Data::from(state);
    let app = test::init_service(
        App::new()
            .app_data(data.clone())
            .default_service(web::route().to(dispatch)),
    )
    .await;

    let checksum = "ab".to_string() + &"cd".repeat(31);
    let req = test::TestRequest::get()
        .uri(&format!("/objects/{}/{}.filez", &checksum[..2], &checksum[2..]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}
