//! Docker engine client over a local Unix socket.
//!
//! Opens a fresh HTTP/1.1 connection per request. Short-lived calls are
//! collected into typed responses; streaming responses (pull progress,
//! exec output) are drained or handed to the caller as an [`ExecStream`].

use crate::capability::{Engine, ExecStream};
use crate::error::{EngineError, Result};
use crate::types::{
    ContainerInspect, ContainerSummary, CreateContainer, CreatedContainer, ExecCreate,
    ExecCreated, ExecInspect,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyDataStream, BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::http::{header, HeaderValue, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::io::StreamReader;

const API_PREFIX: &str = "/v1.43";

/// Header carrying the registry auth payload on image pulls.
const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Client for a dockerd-compatible engine listening on a Unix socket.
pub struct DockerEngine {
    socket_path: PathBuf,
}

impl DockerEngine {
    /// Creates a client for the engine socket at `socket_path`.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Returns the socket path this client connects to.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends one request over a fresh connection and returns the raw
    /// response. The connection task lives until the response body is
    /// consumed.
    async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
        registry_auth: Option<&str>,
    ) -> Result<hyper::Response<Incoming>> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| EngineError::Transport(format!("cannot connect to engine: {e}")))?;

        let (mut sender, conn) = http1::Builder::new()
            .handshake(TokioIo::new(stream))
            .await
            .map_err(|e| EngineError::Transport(format!("engine handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                let msg = e.to_string().to_lowercase();
                if !msg.contains("canceled") && !msg.contains("incomplete") {
                    tracing::debug!("engine connection ended: {}", e);
                }
            }
        });

        let has_body = body.is_some();
        let mut req = Request::builder()
            .method(method)
            .uri(path_and_query)
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| EngineError::Transport(format!("cannot build engine request: {e}")))?;

        req.headers_mut()
            .insert(header::HOST, HeaderValue::from_static("localhost"));
        req.headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        if has_body {
            req.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        if let Some(auth) = registry_auth {
            let value = HeaderValue::from_str(auth)
                .map_err(|e| EngineError::Transport(format!("invalid registry auth: {e}")))?;
            req.headers_mut().insert(REGISTRY_AUTH_HEADER, value);
        }

        sender
            .send_request(req)
            .await
            .map_err(|e| EngineError::Transport(format!("engine request failed: {e}")))
    }

    /// Sends a request and decodes a JSON response body.
    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> Result<T> {
        let resp = self.send(method, path_and_query, body, None).await?;
        let (status, bytes) = collect(resp).await?;
        if !status.is_success() {
            return Err(engine_error(status, &bytes));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Transport(format!("cannot decode engine response: {e}")))
    }

    /// Sends a request where only the status matters. 304 Not Modified
    /// counts as success (start/stop of an already started/stopped
    /// container).
    async fn call_unit(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> Result<()> {
        let resp = self.send(method, path_and_query, body, None).await?;
        let (status, bytes) = collect(resp).await?;
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            Ok(())
        } else {
            Err(engine_error(status, &bytes))
        }
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let path = format!("{API_PREFIX}/containers/json?all={all}");
        self.call_json(Method::GET, &path, None).await
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerInspect> {
        let path = format!("{API_PREFIX}/containers/{name}/json");
        self.call_json(Method::GET, &path, None).await
    }

    async fn pull_image(&self, image: &str, auth: Option<&str>) -> Result<()> {
        let path = format!("{API_PREFIX}/images/create?fromImage={image}");
        let resp = self.send(Method::POST, &path, None, auth).await?;
        let status = resp.status();
        if !status.is_success() {
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| EngineError::Transport(e.to_string()))?
                .to_bytes();
            return Err(engine_error(status, &bytes));
        }
        // Progress frames are discarded; the pull is complete when the
        // stream ends.
        let mut body = resp.into_body();
        while let Some(frame) = body.frame().await {
            frame.map_err(|e| EngineError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    async fn create_container(&self, name: &str, spec: CreateContainer) -> Result<String> {
        let path = format!("{API_PREFIX}/containers/create?name={name}");
        let body = encode(&spec)?;
        let created: CreatedContainer = self.call_json(Method::POST, &path, Some(body)).await?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let path = format!("{API_PREFIX}/containers/{id}/start");
        self.call_unit(Method::POST, &path, None).await
    }

    async fn stop_container(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        let path = match timeout {
            Some(t) => format!("{API_PREFIX}/containers/{name}/stop?t={}", t.as_secs()),
            None => format!("{API_PREFIX}/containers/{name}/stop"),
        };
        self.call_unit(Method::POST, &path, None).await
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let path = format!("{API_PREFIX}/containers/{name}?force={force}");
        self.call_unit(Method::DELETE, &path, None).await
    }

    async fn network_disconnect(
        &self,
        network: &str,
        container_id: &str,
        force: bool,
    ) -> Result<()> {
        let path = format!("{API_PREFIX}/networks/{network}/disconnect");
        let body = encode(&serde_json::json!({
            "Container": container_id,
            "Force": force,
        }))?;
        self.call_unit(Method::POST, &path, Some(body)).await
    }

    async fn exec_create(&self, name: &str, cmd: &[String]) -> Result<String> {
        let path = format!("{API_PREFIX}/containers/{name}/exec");
        let body = encode(&ExecCreate {
            cmd: cmd.to_vec(),
            attach_stderr: true,
        })?;
        let created: ExecCreated = self.call_json(Method::POST, &path, Some(body)).await?;
        if created.id.is_empty() {
            return Err(EngineError::EmptyExecId);
        }
        Ok(created.id)
    }

    async fn exec_attach(&self, exec_id: &str) -> Result<ExecStream> {
        let path = format!("{API_PREFIX}/exec/{exec_id}/start");
        let body = encode(&serde_json::json!({
            "Detach": false,
            "Tty": false,
        }))?;
        let resp = self.send(Method::POST, &path, Some(body), None).await?;
        let status = resp.status();
        if !status.is_success() {
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| EngineError::Transport(e.to_string()))?
                .to_bytes();
            return Err(engine_error(status, &bytes));
        }
        let stream = BodyDataStream::new(resp.into_body()).map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect> {
        let path = format!("{API_PREFIX}/exec/{exec_id}/json");
        self.call_json(Method::GET, &path, None).await
    }
}

/// Collects a response body into memory along with its status.
async fn collect(resp: hyper::Response<Incoming>) -> Result<(StatusCode, Bytes)> {
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?
        .to_bytes();
    Ok((status, bytes))
}

/// Maps a non-success engine response to an error, preferring the message
/// from the engine's JSON error body.
fn engine_error(status: StatusCode, body: &[u8]) -> EngineError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());

    match status {
        StatusCode::NOT_FOUND => EngineError::NotFound(message),
        StatusCode::CONFLICT => EngineError::Conflict(message),
        _ => EngineError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| EngineError::Transport(format!("cannot encode engine request: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_sentinel() {
        let err = engine_error(
            StatusCode::NOT_FOUND,
            br#"{"message": "No such container: web"}"#,
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: No such container: web");
    }

    #[test]
    fn conflict_maps_to_sentinel() {
        let err = engine_error(
            StatusCode::CONFLICT,
            br#"{"message": "name already in use"}"#,
        );
        assert!(err.is_conflict());
    }

    #[test]
    fn opaque_status_keeps_code_and_raw_body() {
        let err = engine_error(StatusCode::INTERNAL_SERVER_ERROR, b"backend blew up\n");
        match err {
            EngineError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "backend blew up");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
