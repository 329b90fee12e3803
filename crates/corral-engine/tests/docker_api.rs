//! Wire-level tests for the Docker engine client.
//!
//! A scripted Unix-socket peer stands in for dockerd: it reads one request
//! and answers with a canned HTTP/1.1 response.

use corral_engine::{DockerEngine, Engine};
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

fn socket_path(dir: &TempDir) -> PathBuf {
    dir.path().join("engine.sock")
}

/// Accepts one connection, reads until the end of the request headers and
/// replies with `response`.
async fn serve_once(listener: UnixListener, response: String) {
    let (mut stream, _) = listener.accept().await.expect("accept failed");
    let mut buf = vec![0u8; 8192];
    let mut read = 0;
    loop {
        let n = stream.read(&mut buf[read..]).await.expect("read failed");
        read += n;
        if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    stream
        .write_all(response.as_bytes())
        .await
        .expect("write failed");
    let _ = stream.shutdown().await;
}

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[tokio::test]
async fn inspect_decodes_state_and_labels() {
    let dir = TempDir::new().unwrap();
    let path = socket_path(&dir);
    let listener = UnixListener::bind(&path).unwrap();
    let body = r#"{
        "Id": "deadbeef",
        "Name": "/svc",
        "Config": {"Labels": {"com.corral.container-manager.container-version": "7"}},
        "State": {"Status": "running", "Running": true, "Error": ""}
    }"#;
    let server = tokio::spawn(serve_once(listener, http_response("200 OK", body)));

    let engine = DockerEngine::new(&path);
    let inspect = engine.inspect_container("svc").await.unwrap();
    assert_eq!(inspect.id, "deadbeef");
    assert!(inspect.state.running);
    assert_eq!(
        inspect.config.labels["com.corral.container-manager.container-version"],
        "7"
    );

    server.await.unwrap();
}

#[tokio::test]
async fn missing_container_surfaces_not_found() {
    let dir = TempDir::new().unwrap();
    let path = socket_path(&dir);
    let listener = UnixListener::bind(&path).unwrap();
    let body = r#"{"message": "No such container: svc"}"#;
    let server = tokio::spawn(serve_once(listener, http_response("404 Not Found", body)));

    let engine = DockerEngine::new(&path);
    let err = engine.inspect_container("svc").await.unwrap_err();
    assert!(err.is_not_found());

    server.await.unwrap();
}

#[tokio::test]
async fn list_decodes_names_and_labels() {
    let dir = TempDir::new().unwrap();
    let path = socket_path(&dir);
    let listener = UnixListener::bind(&path).unwrap();
    let body = r#"[{"Id": "c1", "Names": ["/svc"], "Labels": {"a": "b"}, "State": "running"}]"#;
    let server = tokio::spawn(serve_once(listener, http_response("200 OK", body)));

    let engine = DockerEngine::new(&path);
    let containers = engine.list_containers(false).await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].names, vec!["/svc"]);
    assert_eq!(containers[0].labels["a"], "b");

    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_socket_is_a_transport_error() {
    let dir = TempDir::new().unwrap();
    let engine = DockerEngine::new(dir.path().join("absent.sock"));
    let err = engine.inspect_container("svc").await.unwrap_err();
    assert!(matches!(err, corral_engine::EngineError::Transport(_)));
}
