//! REST-JSON xDS discovery.
//!
//! Serves the published snapshots to data-plane processes using the v3 REST transport: each
//! request names the resource type through its endpoint and identifies the process by its node id.
//! A request carrying the current snapshot version receives a 304, so processes can poll cheaply.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use kube_xds_core::{Node, ResourceType, SnapshotCache};

pub const METRIC_DISCOVERY_REQUESTS: &str = "kube_xds_discovery_requests_total";

/// A v3 discovery request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    /// The version of the last response accepted by the requester.
    #[serde(default, alias = "version_info")]
    pub version_info: String,
    /// The identity of the requester.
    #[serde(default)]
    pub node: Option<Node>,
    /// The resources of interest, all resources of the type if empty.
    #[serde(default, alias = "resource_names")]
    pub resource_names: Vec<String>,
    /// The type of resources requested.
    #[serde(default, alias = "type_url")]
    pub type_url: String,
}

/// A v3 discovery response.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub version_info: String,
    /// The requested resources, each as a protobuf `Any` JSON object.
    pub resources: Vec<Value>,
    pub type_url: String,
}

/// The outcome of a discovery request.
#[derive(Debug)]
pub enum DiscoveryReply {
    /// The snapshot has changed since the requester's last accepted version.
    Updated(DiscoveryResponse),
    /// The requester already holds the current version.
    NotModified,
    /// The request did not carry a node id.
    MissingNode,
    /// No snapshot has been published for the requesting node.
    NoSnapshot,
    /// The request's type URL does not match its endpoint.
    TypeMismatch,
}

impl DiscoveryReply {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Updated(_) => StatusCode::OK,
            Self::NotModified => StatusCode::NOT_MODIFIED,
            Self::MissingNode | Self::TypeMismatch => StatusCode::BAD_REQUEST,
            Self::NoSnapshot => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for DiscoveryReply {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Updated(res) => (status, Json(res)).into_response(),
            Self::NotModified => status.into_response(),
            Self::MissingNode => (status, "node.id is required").into_response(),
            Self::NoSnapshot => (status, "no snapshot found for node").into_response(),
            Self::TypeMismatch => (status, "type_url does not match the discovery endpoint").into_response(),
        }
    }
}

/// Resolve the resource type served by the given discovery endpoint, eg `discovery:clusters`.
pub fn resource_type_for_endpoint(endpoint: &str) -> Option<ResourceType> {
    match endpoint {
        "discovery:listeners" => Some(ResourceType::Listener),
        "discovery:clusters" => Some(ResourceType::Cluster),
        "discovery:secrets" => Some(ResourceType::Secret),
        _ => None,
    }
}

/// Answer the given request for resources of the given type from the snapshot cache.
pub fn respond(cache: &dyn SnapshotCache, ty: ResourceType, req: &DiscoveryRequest) -> DiscoveryReply {
    if !req.type_url.is_empty() && ResourceType::from_type_url(&req.type_url) != Some(ty) {
        return DiscoveryReply::TypeMismatch;
    }
    let node_id = match req.node.as_ref().map(|node| node.id.as_str()) {
        Some(id) if !id.is_empty() => id,
        _ => return DiscoveryReply::MissingNode,
    };
    let snapshot = match cache.get_snapshot(node_id) {
        Some(snapshot) => snapshot,
        None => return DiscoveryReply::NoSnapshot,
    };
    if req.version_info == snapshot.version() {
        return DiscoveryReply::NotModified;
    }

    let resources = snapshot
        .resources(ty)
        .iter()
        .filter(|res| req.resource_names.is_empty() || req.resource_names.iter().any(|name| name == res.name()))
        .map(|res| res.to_any())
        .collect();
    DiscoveryReply::Updated(DiscoveryResponse {
        version_info: snapshot.version().to_string(),
        resources,
        type_url: ty.type_url().to_string(),
    })
}

/// Build the router of the discovery server.
pub fn router(cache: Arc<dyn SnapshotCache>) -> Router {
    Router::new().route("/v3/{endpoint}", post(discover)).with_state(cache)
}

#[tracing::instrument(level = "debug", skip(cache, req), fields(node_id = ?req.node.as_ref().map(|node| &node.id)))]
async fn discover(State(cache): State<Arc<dyn SnapshotCache>>, Path(endpoint): Path<String>, Json(req): Json<DiscoveryRequest>) -> Response {
    let ty = match resource_type_for_endpoint(&endpoint) {
        Some(ty) => ty,
        None => {
            metrics::counter!(METRIC_DISCOVERY_REQUESTS, "type" => "unknown", "status" => StatusCode::NOT_FOUND.as_str().to_string()).increment(1);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let reply = respond(cache.as_ref(), ty, &req);
    let status = reply.status();
    metrics::counter!(METRIC_DISCOVERY_REQUESTS, "type" => ty.as_str(), "status" => status.as_str().to_string()).increment(1);
    if let DiscoveryReply::Updated(res) = &reply {
        tracing::debug!(version = %res.version_info, resources = res.resources.len(), "serving discovery response");
    }
    reply.into_response()
}
