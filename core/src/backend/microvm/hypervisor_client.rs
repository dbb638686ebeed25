// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! A minimal PUT-only HTTP client over a UNIX domain socket, for talking to
//! the hypervisor's local REST-over-UNIX API. The hypervisor never needs
//! anything but `PUT`, so this client doesn't bother exposing GET/POST.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("hypervisor api did not respond within {0:?}")]
    Timeout(Duration),
    #[error("hypervisor api connection failed: {0}")]
    Connect(String),
    #[error("hypervisor rejected {path} with {status}: {body}")]
    NonSuccess {
        path: String,
        status: StatusCode,
        body: String,
    },
    #[error("invalid request body: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct HypervisorClient {
    socket_path: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl HypervisorClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client: Client::builder(TokioExecutor::new()).build(UnixConnector),
        }
    }

    /// Waits for `socket_path` to exist, polling at 50ms intervals. Cancels
    /// (returns `Timeout`) once `deadline` has elapsed.
    pub async fn wait_ready(&self, deadline: Duration) -> Result<(), HypervisorError> {
        let started = tokio::time::Instant::now();
        loop {
            if self.socket_path.exists() {
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(HypervisorError::Timeout(deadline));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Issues `PUT <path>` with a JSON body. Any non-2xx response aborts
    /// with the response body surfaced in the error.
    pub async fn put(&self, path: &str, body: &serde_json::Value) -> Result<(), HypervisorError> {
        let uri: hyper::Uri = UnixUri::new(&self.socket_path, path).into();
        let payload = serde_json::to_vec(body)?;
        let request = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(payload)))
            .expect("well-formed PUT request");

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| HypervisorError::Connect(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let collected = response
            .into_body()
            .collect()
            .await
            .map(|c| c.to_bytes())
            .unwrap_or_default();
        Err(HypervisorError::NonSuccess {
            path: path.to_string(),
            status,
            body: String::from_utf8_lossy(&collected).into_owned(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}
