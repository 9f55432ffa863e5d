//! # Resource Identity
//!
//! Deterministic name generation for managed AWS resources.
//!
//! Names are pure functions of stable identifying fields, so repeated
//! assembly of desired state from the same Kubernetes input always yields
//! the same names and unchanged resources are matched across reconcile
//! cycles (and controller restarts). Mutable attributes such as the health
//! check path are never part of identity; port and protocol are, because
//! AWS forces target group replacement when they change.

use sha2::{Digest, Sha256};

use crate::constants::AWS_RESOURCE_NAME_MAX_LEN;

/// Length of the hash suffix appended to every generated name
const HASH_LEN: usize = 10;

/// Stable name for the load balancer owned by one ingress.
///
/// Format: `{cluster}-{hash(cluster:namespace:ingress)}`, truncated to the
/// AWS 32 character limit.
pub fn load_balancer_name(cluster: &str, namespace: &str, ingress: &str) -> String {
    let digest = short_hash(&[cluster, namespace, ingress]);
    compose(cluster, &digest)
}

/// Stable name for the target group backing one (service, port, protocol)
/// tuple within a cluster.
///
/// The same logical backend always maps to the same cloud object; a port
/// or protocol change naturally produces a new name needing creation
/// rather than an in-place modify the ELBv2 API would reject.
pub fn target_group_name(cluster: &str, service: &str, port: i64, protocol: &str) -> String {
    let port_str = port.to_string();
    let digest = short_hash(&[cluster, service, &port_str, protocol]);
    compose(cluster, &digest)
}

/// Name prefix (`{sanitized-cluster}-`) shared by every resource this
/// controller manages in the cluster. Assembly filters the account-wide
/// load balancer listing through it.
pub fn cluster_prefix(cluster: &str) -> String {
    let prefix_budget = AWS_RESOURCE_NAME_MAX_LEN - HASH_LEN - 1;
    let prefix: String = sanitize(cluster).chars().take(prefix_budget).collect();
    format!("{prefix}-")
}

fn short_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update(b":");
    }
    let digest = hasher.finalize();
    // Hex rendering keeps the name within the AWS character set
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()[..HASH_LEN]
        .to_string()
}

/// Join the sanitized cluster prefix and hash, respecting the 32 character
/// AWS resource name limit.
fn compose(cluster: &str, digest: &str) -> String {
    let prefix_budget = AWS_RESOURCE_NAME_MAX_LEN - HASH_LEN - 1;
    let prefix: String = sanitize(cluster).chars().take(prefix_budget).collect();
    format!("{prefix}-{digest}")
}

/// Reduce a cluster name to the character set AWS accepts for resource
/// names: alphanumerics and hyphens, no leading/trailing hyphen. A name
/// with no valid characters at all falls back to a fixed stub so the
/// composed name never starts with a hyphen.
fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();

    let mut result = String::with_capacity(replaced.len());
    let mut prev_was_dash = false;
    for c in replaced.chars() {
        if c == '-' {
            if !prev_was_dash {
                result.push(c);
                prev_was_dash = true;
            }
        } else {
            result.push(c);
            prev_was_dash = false;
        }
    }

    let trimmed = result.trim_matches('-');
    if trimmed.is_empty() {
        return "alb".to_string();
    }
    trimmed.to_string()
}
