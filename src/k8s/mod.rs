//! # Kubernetes Support
//!
//! The narrow boundary the reconcilers consume from the cluster:
//! node-port lookup for backend services, the schedulable node set, and
//! event emission on the owning Ingress. Everything here is injected as a
//! trait object so the core never touches the API server directly.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference, Service};
use kube::{Api, Client};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::{debug, warn};

/// Node labels marking control-plane nodes, which never receive traffic
const MASTER_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

/// Live cluster state the desired-tree builder needs
#[async_trait]
pub trait ClusterInfo: Send + Sync {
    /// Node port exposed by `service_key` (`namespace/name`) for the given
    /// container port. Fails if the service does not exist, is not of type
    /// NodePort, or exposes no matching port.
    async fn service_node_port(&self, service_key: &str, container_port: i32) -> Result<i64>;

    /// External IDs of every schedulable worker node, sorted
    /// deterministically. Control-plane nodes are excluded.
    async fn schedulable_node_ids(&self) -> Result<Vec<String>>;
}

/// Kubernetes event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Fire-and-forget event emission on the owning Kubernetes object.
/// Silently a no-op when publishing fails; convergence never depends on it.
pub trait EventSink: Send + Sync {
    fn emit(&self, kind: EventKind, reason: &str, message: String);
}

/// [`ClusterInfo`] backed by the kube-rs client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterInfo for KubeCluster {
    async fn service_node_port(&self, service_key: &str, container_port: i32) -> Result<i64> {
        let (namespace, name) = service_key
            .split_once('/')
            .ok_or_else(|| anyhow!("invalid service key {service_key}, expected namespace/name"))?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = services
            .get(name)
            .await
            .with_context(|| format!("failed to fetch service {service_key}"))?;

        let spec = service
            .spec
            .ok_or_else(|| anyhow!("service {service_key} has no spec"))?;

        let service_type = spec.type_.as_deref().unwrap_or("ClusterIP");
        if service_type != "NodePort" {
            return Err(anyhow!(
                "service {service_key} is of type {service_type}, NodePort is required"
            ));
        }

        let ports = spec.ports.unwrap_or_default();
        let matched = ports
            .iter()
            .find(|p| p.port == container_port)
            .ok_or_else(|| {
                anyhow!("service {service_key} exposes no port matching {container_port}")
            })?;

        let node_port = matched.node_port.ok_or_else(|| {
            anyhow!("service {service_key} port {container_port} has no node port assigned")
        })?;

        Ok(i64::from(node_port))
    }

    async fn schedulable_node_ids(&self) -> Result<Vec<String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&Default::default())
            .await
            .context("failed to list nodes")?;

        let mut ids = Vec::new();
        for node in list {
            let name = node.metadata.name.as_deref().unwrap_or("unknown");

            if let Some(labels) = &node.metadata.labels {
                if MASTER_LABELS.iter().any(|l| labels.contains_key(*l)) {
                    debug!("Skipping control-plane node {}", name);
                    continue;
                }
            }

            let Some(spec) = &node.spec else { continue };
            if spec.unschedulable == Some(true) {
                debug!("Skipping unschedulable node {}", name);
                continue;
            }

            // provider_id is aws:///<az>/<instance-id>; the instance id is
            // what RegisterTargets expects
            match spec.provider_id.as_deref().and_then(|p| p.rsplit('/').next()) {
                Some(instance_id) if !instance_id.is_empty() => {
                    ids.push(instance_id.to_string());
                }
                _ => warn!("Node {} has no usable provider id, skipping", name),
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// [`EventSink`] publishing Kubernetes events on one Ingress object
pub struct IngressEventSink {
    recorder: Recorder,
    object_ref: ObjectReference,
}

impl std::fmt::Debug for IngressEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressEventSink")
            .field("object_ref", &self.object_ref)
            .finish_non_exhaustive()
    }
}

impl IngressEventSink {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        let reporter = Reporter {
            controller: "alb-ingress-controller".into(),
            instance: None,
        };
        let object_ref = ObjectReference {
            api_version: Some("networking.k8s.io/v1".to_string()),
            kind: Some("Ingress".to_string()),
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        Self {
            recorder: Recorder::new(client, reporter),
            object_ref,
        }
    }
}

impl EventSink for IngressEventSink {
    fn emit(&self, kind: EventKind, reason: &str, message: String) {
        let event = Event {
            type_: match kind {
                EventKind::Normal => EventType::Normal,
                EventKind::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message),
            action: reason.to_string(),
            secondary: None,
        };
        let recorder = self.recorder.clone();
        let object_ref = self.object_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = recorder.publish(&event, &object_ref).await {
                debug!("Failed to publish event: {}", e);
            }
        });
    }
}
