//! # ALB Resource Model
//!
//! The Current/Desired resource tree managed by the controller:
//!
//! ```text
//! LoadBalancer
//! ├── TargetGroups ── TargetGroup (targets, tags, attributes)
//! └── Listeners ───── Listener ── Rules ── Rule
//! ```
//!
//! Every reconcilable entity carries an optional `desired` side (derived
//! from Kubernetes input) and an optional `current` side (the last-known
//! cloud reality). `desired == None` means "should not exist";
//! `current == None` means "does not yet exist in the cloud". The
//! [`plan`] module turns those pairs into create/modify/delete decisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aws::{AwsError, AwsServices};
use crate::k8s::EventSink;

pub mod assembly;
pub mod id;
pub mod listener;
pub mod listeners;
pub mod loadbalancer;
pub mod plan;
pub mod rule;
pub mod rules;
pub mod tags;
pub mod targetgroup;
pub mod targetgroups;

pub use listener::Listener;
pub use listeners::Listeners;
pub use loadbalancer::LoadBalancer;
pub use rule::Rule;
pub use rules::Rules;
pub use targetgroup::TargetGroup;
pub use targetgroups::TargetGroups;

/// Everything one reconcile pass needs: the per-resource-kind AWS
/// capabilities (shared across all ingresses) and the event sink bound to
/// the owning Ingress object.
pub struct ReconcileCtx {
    pub aws: AwsServices,
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ReconcileCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileCtx").finish_non_exhaustive()
    }
}

/// Typed reconciliation failure, propagated up the resource tree and
/// aggregated at the load balancer level.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A rule or listener default action references a target group that
    /// has no cloud ARN yet; dependency ordering makes this rare
    #[error("target group for service {0} has no ARN yet")]
    MissingTargetGroupArn(String),

    /// AWS cannot change a load balancer scheme in place
    #[error("load balancer scheme cannot change in place ({current} -> {desired})")]
    SchemeImmutable { current: String, desired: String },

    /// A target group delete kept returning ResourceInUse for every
    /// attempt of the bounded retry loop
    #[error("target group {arn} still in use after {attempts} delete attempts")]
    DeleteRetriesExhausted { arn: String, attempts: u32 },

    #[error(transparent)]
    Aws(#[from] AwsError),
}

/// Resource tags as an ordered map. `BTreeMap` keeps diff output and
/// serialized snapshots deterministic.
pub type Tags = BTreeMap<String, String>;

/// Load balancer / target group attributes (e.g. idle timeout,
/// deregistration delay). Same shape as tags, diffed with the same code.
pub type Attributes = BTreeMap<String, String>;

/// A single backend target: a node identified by its cloud instance id,
/// receiving traffic on the service's node port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub port: i64,
}

/// Health check configuration for a target group.
///
/// None of these fields participate in target group identity: AWS allows
/// all of them to be updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub port: String,
    pub protocol: String,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            port: "traffic-port".to_string(),
            protocol: "HTTP".to_string(),
            interval_seconds: 15,
            timeout_seconds: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}
