//! HTTP/JSON surface over the [`Service`] facade.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use logmesh_core::{LogEntryWire, PublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::service::{InitRequest, Service, ServiceError, Status};

pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/v1/init", post(init))
        .route("/v1/update", post(update))
        .route("/v1/query", post(query))
        .route("/v1/nodes", post(update_nodes))
        .route("/v1/nodes/remove", post(remove_node))
        .route("/v1/status", get(status))
        .route("/v1/writers", get(writers))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::InvalidKey(_) | ServiceError::Codec(_) | ServiceError::NoRecordedLog => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::NotWritable => StatusCode::FORBIDDEN,
            ServiceError::AlreadyInitialized => StatusCode::CONFLICT,
            ServiceError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Log(_) | ServiceError::Mesh(_) => {
                tracing::error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

type RpcResult<T> = Result<Json<T>, ServiceError>;

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitBody {
    node_private_key: String,
    #[serde(default)]
    log_private_key: Option<String>,
    #[serde(default)]
    bootstrap: bool,
    data_dir: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitReply {
    log_key: PublicKey,
}

async fn init(State(service): State<Arc<Service>>, Json(body): Json<InitBody>) -> RpcResult<InitReply> {
    let log_key = service
        .init(InitRequest {
            node_private_key: body.node_private_key,
            log_private_key: body.log_private_key,
            bootstrap: body.bootstrap,
            data_dir: body.data_dir,
        })
        .await?;
    Ok(Json(InitReply { log_key }))
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    data: LogEntryWire,
}

async fn update(State(service): State<Arc<Service>>, Json(body): Json<UpdateBody>) -> RpcResult<Empty> {
    service.update(body.data).await?;
    Ok(Json(Empty {}))
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct QueryReply {
    data: Vec<LogEntryWire>,
}

async fn query(State(service): State<Arc<Service>>, Json(body): Json<QueryBody>) -> RpcResult<QueryReply> {
    let data = service.query(&body.keys).await?;
    Ok(Json(QueryReply { data }))
}

#[derive(Debug, Deserialize)]
struct NodesBody {
    #[serde(default)]
    nodes: Vec<String>,
}

async fn update_nodes(State(service): State<Arc<Service>>, Json(body): Json<NodesBody>) -> RpcResult<Empty> {
    let nodes = body
        .nodes
        .iter()
        .map(|node| parse_node(node))
        .collect::<Result<Vec<_>, _>>()?;
    service.update_nodes(&nodes).await?;
    Ok(Json(Empty {}))
}

#[derive(Debug, Deserialize)]
struct RemoveNodeBody {
    node: String,
}

async fn remove_node(State(service): State<Arc<Service>>, Json(body): Json<RemoveNodeBody>) -> RpcResult<Empty> {
    service.remove_node(parse_node(&body.node)?).await?;
    Ok(Json(Empty {}))
}

async fn status(State(service): State<Arc<Service>>) -> Json<Status> {
    Json(service.status().await)
}

#[derive(Debug, Serialize)]
struct WritersReply {
    writers: Vec<PublicKey>,
}

async fn writers(State(service): State<Arc<Service>>) -> RpcResult<WritersReply> {
    let writers = service.writers().await?.into_iter().map(|w| w.key).collect();
    Ok(Json(WritersReply { writers }))
}

async fn health(State(service): State<Arc<Service>>) -> impl IntoResponse {
    if service.is_initialized().await {
        (StatusCode::OK, "SERVING")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_SERVING")
    }
}

/// Node keys travel as base64 of the raw 32 bytes.
fn parse_node(node: &str) -> Result<PublicKey, ServiceError> {
    let bytes = STANDARD
        .decode(node)
        .map_err(|e| ServiceError::InvalidKey(format!("node {:?}: {}", node, e)))?;
    PublicKey::from_slice(&bytes).map_err(|e| ServiceError::InvalidKey(format!("node {:?}: {}", node, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use logmesh_core::Keypair;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<Service>) {
        let service = Arc::new(Service::new(Config {
            mesh_listen: "127.0.0.1:0".to_string(),
            ..Default::default()
        }));
        (router(service.clone()), service)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ));
        (status, value)
    }

    async fn init_bootstrap(app: &Router, dir: &TempDir) -> (Keypair, Keypair) {
        let node = Keypair::generate();
        let log = Keypair::generate();
        let (status, body) = call(
            app,
            "POST",
            "/v1/init",
            Some(json!({
                "nodePrivateKey": node.secret_hex(),
                "logPrivateKey": log.secret_hex(),
                "bootstrap": true,
                "dataDir": dir.path(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["logKey"], json!(log.public_key().to_hex()));
        (node, log)
    }

    // ==================== Lifecycle ====================

    #[tokio::test]
    async fn test_health_follows_init() {
        let (app, service) = app();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!("NOT_SERVING"));

        let dir = TempDir::new().unwrap();
        init_bootstrap(&app, &dir).await;

        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("SERVING"));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_query_before_init_is_unavailable() {
        let (app, _) = app();
        let (status, body) = call(&app, "POST", "/v1/query", Some(json!({"keys": ["k"]}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], json!("Service is not initialized"));
    }

    #[tokio::test]
    async fn test_second_init_conflicts() {
        let (app, service) = app();
        let dir = TempDir::new().unwrap();
        init_bootstrap(&app, &dir).await;

        let (status, _) = call(
            &app,
            "POST",
            "/v1/init",
            Some(json!({
                "nodePrivateKey": Keypair::generate().secret_hex(),
                "bootstrap": true,
                "dataDir": dir.path(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        service.shutdown().await;
    }

    // ==================== Entries ====================

    #[tokio::test]
    async fn test_update_then_query() {
        let (app, service) = app();
        let dir = TempDir::new().unwrap();
        init_bootstrap(&app, &dir).await;

        let (status, _) = call(
            &app,
            "POST",
            "/v1/update",
            Some(json!({"data": {
                "hash": STANDARD.encode([0xab, 0x12]),
                "proof": STANDARD.encode([1, 2, 3]),
                "key": {"entropy": STANDARD.encode([9u8; 32])},
                "size": "1024",
                "aliases": ["nice-name"],
            }})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "POST", "/v1/query", Some(json!({"keys": ["nice-name"]}))).await;
        assert_eq!(status, StatusCode::OK);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["hash"], json!(STANDARD.encode([0xab, 0x12])));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_with_empty_hash_is_bad_request() {
        let (app, service) = app();
        let dir = TempDir::new().unwrap();
        init_bootstrap(&app, &dir).await;

        let (status, body) = call(
            &app,
            "POST",
            "/v1/update",
            Some(json!({"data": {"hash": "", "aliases": ["nice-name"]}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("hash"));
        service.shutdown().await;
    }

    // ==================== Nodes ====================

    #[tokio::test]
    async fn test_add_and_remove_node() {
        let (app, service) = app();
        let dir = TempDir::new().unwrap();
        init_bootstrap(&app, &dir).await;
        let peer = Keypair::generate().public_key();
        let encoded = STANDARD.encode(peer.as_bytes());

        let (status, _) = call(&app, "POST", "/v1/nodes", Some(json!({"nodes": [encoded]}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/v1/writers", None).await;
        assert!(body["writers"].as_array().unwrap().contains(&json!(peer.to_hex())));

        let (status, _) = call(&app, "POST", "/v1/nodes/remove", Some(json!({"node": encoded}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/v1/writers", None).await;
        assert!(!body["writers"].as_array().unwrap().contains(&json!(peer.to_hex())));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_node_key_is_rejected() {
        let (app, service) = app();
        let dir = TempDir::new().unwrap();
        init_bootstrap(&app, &dir).await;

        let short = STANDARD.encode([1u8; 7]);
        let (status, _) = call(&app, "POST", "/v1/nodes", Some(json!({"nodes": [short]}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "POST", "/v1/nodes/remove", Some(json!({"node": "%%%"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_reports_identity() {
        let (app, service) = app();
        let dir = TempDir::new().unwrap();
        let (node, log) = init_bootstrap(&app, &dir).await;

        let (status, body) = call(&app, "GET", "/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["initialized"], json!(true));
        assert_eq!(body["writable"], json!(true));
        assert_eq!(body["nodeKey"], json!(node.public_key().to_hex()));
        assert_eq!(body["logKey"], json!(log.public_key().to_hex()));
        service.shutdown().await;
    }
}
