//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use docstore_api::{Components, build_app};
use docstore_core::config::{AppConfig, DatabaseDriver};
use docstore_core::traits::storage::ObjectStore;
use docstore_core::types::id::{NodeId, PrincipalId};
use docstore_database::memory::MemoryNodeDirectory;
use docstore_database::repositories::RepositorySet;
use docstore_storage::build_object_store;

const BOUNDARY: &str = "docstore-test-boundary";

/// A response with its body collected.
#[derive(Debug)]
pub struct TestResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub bytes: Bytes,
}

impl TestResponse {
    /// Body parsed as JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).expect("response body is JSON")
    }

    /// The `data` member of a success envelope.
    pub fn data(&self) -> Value {
        let body = self.json();
        assert_eq!(body["success"], true, "not a success envelope: {body}");
        body["data"].clone()
    }
}

/// Test application context: in-memory metadata, a local object store in
/// a scratch directory, and a running worker.
pub struct TestApp {
    /// Scratch directory holding objects and spool files.
    pub dir: TempDir,
    /// Wired components.
    pub components: Components,
    /// The Axum router for making test requests.
    pub router: Router,
    /// Classification tree.
    pub nodes: MemoryNodeDirectory,
    /// A top-level collection to upload into.
    pub collection: NodeId,
    /// Principal sent with every request.
    pub principal: PrincipalId,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl TestApp {
    /// Create a new test application with a running worker.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test application after adjusting its configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");

        let mut config = AppConfig::default();
        config.database.driver = DatabaseDriver::Memory;
        config.storage.local.root_path = dir.path().join("objects").to_string_lossy().into_owned();
        config.storage.temp_dir = dir.path().join("spool").to_string_lossy().into_owned();
        config.storage.max_upload_size_bytes = 1024 * 1024;
        config.worker.poll_interval_ms = 20;
        config.worker.backoff_base_ms = 10;
        adjust(&mut config);

        let nodes = MemoryNodeDirectory::new();
        let collection = nodes.add_collection("Engineering").await;
        let store = build_object_store(&config.storage).await.expect("object store");
        let components =
            Components::assemble(config.clone(), RepositorySet::memory(nodes.clone()), store);
        let router = build_app(components.state.clone());

        let (shutdown, rx) = watch::channel(false);
        let worker = config.worker.enabled.then(|| {
            let runner = components
                .worker("test-worker".to_string())
                .with_drain_timeout(Duration::from_secs(5));
            tokio::spawn(async move { runner.run(rx).await })
        });

        Self {
            dir,
            components,
            router,
            nodes,
            collection,
            principal: PrincipalId::new(),
            shutdown,
            worker,
        }
    }

    /// The object store behind the app.
    pub fn store(&self) -> &std::sync::Arc<dyn ObjectStore> {
        self.components.state.engine.store()
    }

    /// Spool directory for multipart uploads.
    pub fn spool_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("spool")
    }

    /// Send a request as the test principal.
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-principal-id", self.principal.to_string());
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("request")).await
    }

    /// Send a multipart upload as the test principal.
    pub async fn upload(
        &self,
        uri: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
    ) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-principal-id", self.principal.to_string())
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, file)))
            .expect("request");
        self.send(request).await
    }

    /// Send an arbitrary request.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        TestResponse {
            status,
            headers,
            bytes,
        }
    }

    /// Poll a job until it reaches a terminal state; returns its status view.
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        for _ in 0..500 {
            let response = self.request("GET", &format!("/api/jobs/{job_id}"), None).await;
            assert_eq!(response.status, StatusCode::OK);
            let view = response.data();
            if view["state"] == "completed" || view["state"] == "failed" {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    /// Create a document and wait for ingestion; returns the job result.
    pub async fn create_document(&self, title: &str, file_name: &str, mime: &str, data: &[u8]) -> Value {
        let collection = self.collection.to_string();
        let response = self
            .upload(
                "/api/documents",
                &[("node_id", collection.as_str()), ("title", title)],
                Some((file_name, mime, data)),
            )
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{:?}", response.json());
        let job_id = response.data()["job_id"].as_str().expect("job id").to_string();
        let view = self.wait_for_job(&job_id).await;
        assert_eq!(view["state"], "completed", "{view}");
        view["result"].clone()
    }

    /// Upload a new version and wait for ingestion; returns the job result.
    pub async fn upload_version(
        &self,
        document_id: &str,
        fields: &[(&str, &str)],
        file_name: &str,
        data: &[u8],
    ) -> Value {
        let response = self
            .upload(
                &format!("/api/documents/{document_id}/versions"),
                fields,
                Some((file_name, "application/octet-stream", data)),
            )
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{:?}", response.json());
        let job_id = response.data()["job_id"].as_str().expect("job id").to_string();
        let view = self.wait_for_job(&job_id).await;
        assert_eq!(view["state"], "completed", "{view}");
        view["result"].clone()
    }

    /// Stop the worker and wait for it to drain.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(worker) = self.worker.take() {
            worker.await.expect("worker task");
        }
    }
}

/// Encode a multipart/form-data body.
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, mime, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Deterministic test payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
