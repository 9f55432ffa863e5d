//! # Ingress Aggregate
//!
//! [`AlbIngress`] pairs one Kubernetes Ingress object with the load
//! balancer tree provisioned for it. The desired side of the tree is
//! rebuilt from the live object on every pass; the current side is
//! carried forward across rebuilds by resource identity (target groups by
//! name, listeners by port, rules by priority), so the diff engine only
//! ever sees drift, never a cold start.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::alb::listener::ListenerSpec;
use crate::alb::loadbalancer::LoadBalancerSpec;
use crate::alb::rule::{RuleCondition, RuleSpec};
use crate::alb::targetgroup::{TargetGroup, TargetGroupSpec};
use crate::alb::{
    id, Attributes, HealthCheck, Listener, Listeners, LoadBalancer, ReconcileCtx, Rule, Rules,
    Tags, Target, TargetGroups,
};
use crate::annotations::IngressAnnotations;
use crate::constants::{
    ATTR_IDLE_TIMEOUT, TAG_CLUSTER, TAG_INGRESS_NAME, TAG_NAMESPACE, TAG_SERVICE_NAME,
    TAG_SERVICE_PORT,
};
use crate::k8s::ClusterInfo;

/// One managed ingress and the load balancer tree behind it
#[derive(Debug, Clone, Serialize)]
pub struct AlbIngress {
    /// Registry key, `namespace/name`
    pub id: String,
    pub namespace: String,
    pub name: String,
    /// A tainted ingress is excluded from reconciliation until its
    /// Kubernetes object changes again (e.g. after an annotation typo)
    pub tainted: bool,
    pub last_error: Option<String>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub load_balancer: Option<LoadBalancer>,
}

impl AlbIngress {
    pub fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    /// Adopt a current-only tree discovered by state assembly
    pub fn adopted(namespace: String, name: String, load_balancer: LoadBalancer) -> Self {
        Self {
            id: Self::key(&namespace, &name),
            namespace,
            name,
            tainted: false,
            last_error: None,
            last_reconciled_at: None,
            load_balancer: Some(load_balancer),
        }
    }

    /// Build the aggregate from a live Ingress object, carrying forward
    /// any current state held in `existing`. Annotation or cluster lookup
    /// failures return an error; the caller decides whether to taint.
    pub async fn from_ingress(
        ingress: &Ingress,
        existing: Option<&AlbIngress>,
        cluster_name: &str,
        cluster: &dyn ClusterInfo,
    ) -> anyhow::Result<Self> {
        let namespace = ingress
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| anyhow!("ingress has no namespace"))?;
        let name = ingress
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow!("ingress has no name"))?;
        let key = Self::key(&namespace, &name);

        let annotation_map = ingress.metadata.annotations.clone().unwrap_or_default();
        let annotations = IngressAnnotations::parse(&annotation_map)
            .with_context(|| format!("parsing annotations of {key}"))?;

        let desired = build_desired_tree(
            ingress,
            &annotations,
            cluster_name,
            &namespace,
            &name,
            cluster,
        )
        .await
        .with_context(|| format!("building desired state of {key}"))?;

        let load_balancer = merge_current(
            desired,
            existing.and_then(|e| e.load_balancer.clone()),
        );

        Ok(Self {
            id: key,
            namespace,
            name,
            tainted: false,
            last_error: existing.and_then(|e| e.last_error.clone()),
            last_reconciled_at: existing.and_then(|e| e.last_reconciled_at),
            load_balancer: Some(load_balancer),
        })
    }

    /// Exclude this ingress from reconciliation until its object changes
    pub fn taint(&mut self, reason: &str) {
        warn!(ingress = %self.id, "Tainting ingress: {reason}");
        self.tainted = true;
        self.last_error = Some(reason.to_string());
    }

    /// Remove desired state from the whole tree; the next reconcile pass
    /// tears the cloud resources down. A taint lasts until the object
    /// changes, and its removal is such a change, so teardown untaints.
    pub fn strip_desired(&mut self) {
        self.tainted = false;
        if let Some(lb) = &mut self.load_balancer {
            lb.strip_desired();
        }
    }

    /// True once teardown finished and nothing remains to manage
    pub fn is_torn_down(&self) -> bool {
        self.load_balancer.is_none()
    }

    /// One convergence pass. Errors are aggregated into `last_error`; a
    /// tainted ingress is skipped entirely.
    pub async fn reconcile(&mut self, ctx: &ReconcileCtx) {
        if self.tainted {
            warn!(ingress = %self.id, "Skipping tainted ingress");
            return;
        }
        let Some(lb) = &mut self.load_balancer else {
            return;
        };

        let errors = lb.reconcile(ctx).await;
        if lb.deleted {
            info!(ingress = %self.id, "Load balancer torn down");
            self.load_balancer = None;
        }

        if errors.is_empty() {
            self.last_error = None;
        } else {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            warn!(ingress = %self.id, "Reconciliation errors: {joined}");
            self.last_error = Some(joined);
        }
        self.last_reconciled_at = Some(Utc::now());
    }

    /// DNS name of the provisioned load balancer, once it exists
    pub fn dns_name(&self) -> Option<&str> {
        self.load_balancer.as_ref().and_then(LoadBalancer::dns_name)
    }
}

/// Build the desired-only tree for one ingress object
async fn build_desired_tree(
    ingress: &Ingress,
    annotations: &IngressAnnotations,
    cluster_name: &str,
    namespace: &str,
    name: &str,
    cluster: &dyn ClusterInfo,
) -> anyhow::Result<LoadBalancer> {
    let node_ids = cluster
        .schedulable_node_ids()
        .await
        .context("listing schedulable nodes")?;

    let mut identity_tags = Tags::from([
        (TAG_CLUSTER.to_string(), cluster_name.to_string()),
        (TAG_NAMESPACE.to_string(), namespace.to_string()),
        (TAG_INGRESS_NAME.to_string(), name.to_string()),
    ]);
    identity_tags.extend(annotations.tags.clone());

    // Every backend referenced anywhere on the ingress, in first-seen
    // order: rule paths first, then the explicit default backend
    let mut backends: Vec<(String, i64)> = Vec::new();
    let mut push_backend = |service: String, port: i64| {
        if !backends.iter().any(|(s, p)| *s == service && *p == port) {
            backends.push((service, port));
        }
    };

    let spec = ingress
        .spec
        .as_ref()
        .ok_or_else(|| anyhow!("ingress has no spec"))?;
    for rule in spec.rules.iter().flatten() {
        for path in rule
            .http
            .iter()
            .flat_map(|http| http.paths.iter())
        {
            let (service, port) = backend_service(namespace, Some(&path.backend))?;
            push_backend(service, port);
        }
    }
    if let Some(default) = &spec.default_backend {
        let (service, port) = backend_service(namespace, Some(default))?;
        push_backend(service, port);
    }
    if backends.is_empty() {
        return Err(anyhow!("ingress references no backend services"));
    }

    // The default action falls back to the first backend when no explicit
    // default backend is set
    let (default_service, default_port) = match &spec.default_backend {
        Some(default) => backend_service(namespace, Some(default))?,
        None => backends[0].clone(),
    };

    let mut health_check = HealthCheck::default();
    if let Some(path) = &annotations.healthcheck_path {
        health_check.path.clone_from(path);
    }
    if let Some(interval) = annotations.healthcheck_interval_seconds {
        health_check.interval_seconds = interval;
    }

    // One target group per backend, named after the node port it fronts:
    // a node port change yields a new group and the stale one is pruned
    let mut target_groups = Vec::with_capacity(backends.len());
    for (service, port) in &backends {
        let node_port = cluster
            .service_node_port(service, i32::try_from(*port).context("service port")?)
            .await
            .with_context(|| format!("resolving node port of {service}:{port}"))?;

        let mut tags = identity_tags.clone();
        tags.insert(TAG_SERVICE_NAME.to_string(), service.clone());
        tags.insert(TAG_SERVICE_PORT.to_string(), port.to_string());

        let targets = node_ids
            .iter()
            .map(|id| Target {
                id: id.clone(),
                port: node_port,
            })
            .collect();

        target_groups.push(TargetGroup {
            id: id::target_group_name(
                cluster_name,
                service,
                node_port,
                &annotations.backend_protocol,
            ),
            service_name: service.clone(),
            service_port: *port,
            desired: Some(TargetGroupSpec {
                port: node_port,
                protocol: annotations.backend_protocol.clone(),
                health_check: health_check.clone(),
                tags,
                attributes: Attributes::new(),
                targets,
            }),
            current: None,
            deleted: false,
        });
    }

    // Rules are shared by every listener: priorities are assigned in
    // ingress order starting at 1 (0 is the default action)
    let mut rule_specs = Vec::new();
    let mut priority = 1;
    for rule in spec.rules.iter().flatten() {
        for path in rule
            .http
            .iter()
            .flat_map(|http| http.paths.iter())
        {
            let (service, port) = backend_service(namespace, Some(&path.backend))?;
            let mut conditions = Vec::new();
            if let Some(host) = &rule.host {
                conditions.push(RuleCondition {
                    field: "host-header".to_string(),
                    values: vec![host.clone()],
                });
            }
            if let Some(p) = &path.path {
                conditions.push(RuleCondition {
                    field: "path-pattern".to_string(),
                    values: vec![p.clone()],
                });
            }
            if conditions.is_empty() {
                // Matches everything; the default action already does
                continue;
            }
            rule_specs.push(RuleSpec {
                priority,
                service_name: service,
                service_port: port,
                conditions,
            });
            priority += 1;
        }
    }

    let listeners = annotations
        .listen_ports
        .iter()
        .map(|lp| {
            let mut listener = Listener::new(ListenerSpec {
                port: lp.port,
                protocol: lp.protocol.clone(),
                certificate_arn: if lp.protocol == "HTTPS" {
                    annotations.certificate_arn.clone()
                } else {
                    None
                },
                default_service: default_service.clone(),
                default_service_port: default_port,
            });
            listener.rules = Rules(rule_specs.iter().cloned().map(Rule::new).collect());
            listener
        })
        .collect();

    let mut attributes = Attributes::new();
    if let Some(idle) = annotations.idle_timeout_seconds {
        attributes.insert(ATTR_IDLE_TIMEOUT.to_string(), idle.to_string());
    }

    Ok(LoadBalancer {
        id: id::load_balancer_name(cluster_name, namespace, name),
        desired: Some(LoadBalancerSpec {
            scheme: annotations.scheme.clone(),
            subnets: annotations.subnets.clone(),
            security_groups: annotations.security_groups.clone(),
            tags: identity_tags,
            attributes,
            web_acl_arn: annotations.web_acl_arn.clone(),
        }),
        current: None,
        target_groups: TargetGroups(target_groups),
        listeners: Listeners(listeners),
        deleted: false,
    })
}

/// Extract `namespace/name` and port from an ingress backend
fn backend_service(
    namespace: &str,
    backend: Option<&IngressBackend>,
) -> anyhow::Result<(String, i64)> {
    let service = backend
        .and_then(|b| b.service.as_ref())
        .ok_or_else(|| anyhow!("backend has no service"))?;
    let port = service
        .port
        .as_ref()
        .and_then(|p| p.number)
        .ok_or_else(|| anyhow!("backend service {} has no numeric port", service.name))?;
    Ok((format!("{namespace}/{}", service.name), i64::from(port)))
}

/// Graft the current side of the previous tree onto a freshly built
/// desired tree. Resources present before but absent from the new desired
/// tree are kept with `desired == None`, which schedules their deletion.
fn merge_current(mut desired: LoadBalancer, existing: Option<LoadBalancer>) -> LoadBalancer {
    let Some(old) = existing else {
        return desired;
    };
    desired.current = old.current;

    for old_group in old.target_groups.0 {
        match desired.target_groups.find_mut(&old_group.id) {
            Some(new_group) => new_group.current = old_group.current,
            None => {
                let mut kept = old_group;
                kept.desired = None;
                desired.target_groups.0.push(kept);
            }
        }
    }

    for old_listener in old.listeners.0 {
        let Some(port) = old_listener.port() else { continue };
        match desired.listeners.find_mut(port) {
            Some(new_listener) => {
                new_listener.current = old_listener.current;
                for old_rule in old_listener.rules.0 {
                    let Some(priority) = old_rule.priority() else { continue };
                    match new_listener.rules.find_mut(priority) {
                        Some(new_rule) => new_rule.current = old_rule.current,
                        None => {
                            let mut kept = old_rule;
                            kept.desired = None;
                            new_listener.rules.0.push(kept);
                        }
                    }
                }
            }
            None => {
                let mut kept = old_listener;
                kept.desired = None;
                for rule in &mut kept.rules.0 {
                    rule.desired = None;
                }
                desired.listeners.0.push(kept);
            }
        }
    }

    desired
}

/// Shared registry of every managed ingress. The outer lock is held only
/// long enough to find or insert an entry; the per-ingress mutex
/// serializes reconciliation so a slow AWS call on one ingress never
/// blocks the others.
#[derive(Debug, Default)]
pub struct IngressRegistry {
    entries: RwLock<HashMap<String, Arc<Mutex<AlbIngress>>>>,
}

impl IngressRegistry {
    pub async fn get(&self, key: &str) -> Option<Arc<Mutex<AlbIngress>>> {
        self.entries.read().await.get(key).map(Arc::clone)
    }

    /// Existing entry for `key`, or a freshly inserted one built by `init`
    pub async fn get_or_insert_with(
        &self,
        key: &str,
        init: impl FnOnce() -> AlbIngress,
    ) -> Arc<Mutex<AlbIngress>> {
        let mut entries = self.entries.write().await;
        Arc::clone(
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(init()))),
        )
    }

    pub async fn insert(&self, ingress: AlbIngress) -> Arc<Mutex<AlbIngress>> {
        let entry = Arc::new(Mutex::new(ingress));
        let key = entry.lock().await.id.clone();
        self.entries.write().await.insert(key, Arc::clone(&entry));
        entry
    }

    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn all(&self) -> Vec<Arc<Mutex<AlbIngress>>> {
        self.entries.read().await.values().map(Arc::clone).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Point-in-time clone of every aggregate, for the state endpoint
    pub async fn snapshot(&self) -> Vec<AlbIngress> {
        let entries = self.all().await;
        let mut snapshot = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshot.push(entry.lock().await.clone());
        }
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }
}
