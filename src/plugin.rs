//! Volume plugin protocol endpoint
//!
//! The container runtime talks to the driver with JSON POST requests over a
//! unix socket. `dispatch` maps one request to a driver call; `serve` runs the
//! HTTP/1 listener around it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::driver::VolumeDriver;
use crate::error::VolumeError;

/// Content type of every plugin response
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest {
    name: String,
    #[serde(default)]
    opts: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountRequest {
    name: String,
    #[serde(rename = "ID")]
    id: String,
}

enum RequestError {
    UnknownEndpoint,
    Malformed(String),
    Volume(VolumeError),
}

impl From<VolumeError> for RequestError {
    fn from(e: VolumeError) -> Self {
        RequestError::Volume(e)
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, RequestError> {
    serde_json::from_slice(body).map_err(|e| RequestError::Malformed(e.to_string()))
}

/// Handle one plugin request and produce the status and JSON body
pub async fn dispatch(driver: &VolumeDriver, path: &str, body: &[u8]) -> (StatusCode, Value) {
    match route(driver, path, body).await {
        Ok(value) => (StatusCode::OK, value),
        Err(RequestError::UnknownEndpoint) => {
            warn!("Unknown plugin endpoint {}", path);
            (
                StatusCode::NOT_FOUND,
                json!({ "Err": format!("unknown endpoint {}", path) }),
            )
        }
        Err(RequestError::Malformed(e)) => {
            warn!("Malformed {} request: {}", path, e);
            (
                StatusCode::BAD_REQUEST,
                json!({ "Err": format!("malformed request: {}", e) }),
            )
        }
        Err(RequestError::Volume(e)) => {
            warn!("{} failed: {}", path, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "Err": e.to_string() }),
            )
        }
    }
}

async fn route(driver: &VolumeDriver, path: &str, body: &[u8]) -> Result<Value, RequestError> {
    match path {
        "/Plugin.Activate" => {
            info!("Activate request");
            Ok(json!({ "Implements": ["VolumeDriver"] }))
        }
        "/VolumeDriver.Create" => {
            let req: CreateRequest = parse(body)?;
            info!("Create request: {}", req.name);
            driver
                .create(&req.name, &req.opts.unwrap_or_default())
                .await?;
            Ok(json!({}))
        }
        "/VolumeDriver.Remove" => {
            let req: NameRequest = parse(body)?;
            info!("Remove request: {}", req.name);
            driver.remove(&req.name).await?;
            Ok(json!({}))
        }
        "/VolumeDriver.Mount" => {
            let req: MountRequest = parse(body)?;
            info!("Mount request: {} (id {})", req.name, req.id);
            let mountpoint = driver.mount(&req.id, &req.name).await?;
            Ok(json!({ "Mountpoint": mountpoint }))
        }
        "/VolumeDriver.Unmount" => {
            let req: MountRequest = parse(body)?;
            info!("Unmount request: {} (id {})", req.name, req.id);
            driver.unmount(&req.id, &req.name).await?;
            Ok(json!({}))
        }
        "/VolumeDriver.Path" => {
            let req: NameRequest = parse(body)?;
            info!("Path request: {}", req.name);
            Ok(json!({ "Mountpoint": driver.path(&req.name)? }))
        }
        "/VolumeDriver.Get" => {
            let req: NameRequest = parse(body)?;
            info!("Get request: {}", req.name);
            Ok(json!({ "Volume": driver.get(&req.name)? }))
        }
        "/VolumeDriver.List" => {
            info!("List request");
            Ok(json!({ "Volumes": driver.list() }))
        }
        "/VolumeDriver.Capabilities" => {
            info!("Capabilities request");
            Ok(json!({ "Capabilities": driver.capabilities() }))
        }
        _ => Err(RequestError::UnknownEndpoint),
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
    response
}

async fn handle(
    driver: Arc<VolumeDriver>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if *req.method() != Method::POST {
        return Ok(json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &json!({ "Err": "only POST is supported" }),
        ));
    }

    let path = req.uri().path().to_string();
    let (status, body) = match req.into_body().collect().await {
        Ok(collected) => dispatch(&driver, &path, &collected.to_bytes()).await,
        Err(e) => (
            StatusCode::BAD_REQUEST,
            json!({ "Err": format!("unable to read request body: {}", e) }),
        ),
    };
    Ok(json_response(status, &body))
}

/// Serve the plugin protocol on `socket` until `shutdown` is notified.
///
/// A stale socket file is replaced; the socket is removed on return.
pub async fn serve(driver: Arc<VolumeDriver>, socket: &Path, shutdown: Arc<Notify>) -> io::Result<()> {
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if socket.exists() {
        debug!("Removing stale socket {:?}", socket);
        std::fs::remove_file(socket)?;
    }

    let listener = UnixListener::bind(socket)?;
    let _cleanup = scopeguard::guard(socket.to_path_buf(), |path| {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to remove socket {:?}: {}", path, e);
        }
    });
    info!("Listening on {:?}", socket);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("Stopping plugin listener");
                break;
            }
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let driver = driver.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(driver.clone(), req));
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("Connection closed with error: {}", e);
                    }
                });
            }
        }
    }

    Ok(())
}
