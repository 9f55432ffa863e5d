//! # Target Groups Collection Reconciler
//!
//! Ordered reconciliation of every target group owned by one load
//! balancer, plus the orphan detection the load balancer reconciler uses
//! to clean up groups no rule forwards to anymore.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::listeners::Listeners;
use super::targetgroup::TargetGroup;
use super::{ReconcileCtx, ReconcileError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetGroups(pub Vec<TargetGroup>);

impl TargetGroups {
    /// Reconcile every member in stored order. The first member error
    /// aborts the pass; earlier members' applied changes stay applied.
    /// On success, members flagged `deleted` are filtered out.
    pub async fn reconcile(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        for group in &mut self.0 {
            group.reconcile(ctx).await?;
        }
        self.0.retain(|group| !group.deleted);
        Ok(())
    }

    /// Current ARN of the group backing (service, port), if it exists in
    /// the cloud yet. Rules and listener default actions resolve their
    /// forwarding targets through this.
    pub fn arn_for_service(&self, service: &str, port: i64) -> Option<String> {
        self.0
            .iter()
            .find(|g| g.service_name == service && g.service_port == port)
            .and_then(|g| g.arn().map(str::to_string))
    }

    /// Whether any member still exists on the AWS side
    pub fn has_current(&self) -> bool {
        self.0.iter().any(|g| g.current.is_some())
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TargetGroup> {
        self.0.iter_mut().find(|g| g.id == id)
    }

    /// IDs of groups no rule forwarding action and no listener default
    /// action references (by ARN on the current side, by service on the
    /// desired side).
    pub fn unused(&self, listeners: &Listeners) -> Vec<String> {
        let referenced_arns = listeners.referenced_target_group_arns();
        let referenced_services = listeners.referenced_services();

        self.0
            .iter()
            .filter(|group| {
                let arn_referenced = group
                    .arn()
                    .is_some_and(|arn| referenced_arns.contains(arn));
                let service_referenced = referenced_services
                    .contains(&(group.service_name.clone(), group.service_port));
                !arn_referenced && !service_referenced
            })
            .map(|group| group.id.clone())
            .collect()
    }

    /// Strip desired state from unused groups and delete them. Called by
    /// the load balancer reconciler after listeners and rules settled.
    pub async fn prune_unused(
        &mut self,
        ctx: &ReconcileCtx,
        listeners: &Listeners,
    ) -> Result<(), ReconcileError> {
        let unused = self.unused(listeners);
        for id in unused {
            let Some(group) = self.find_mut(&id) else { continue };
            group.desired = None;
            if group.current.is_some() {
                info!(target_group = %id, "Deleting unreferenced target group");
                group.delete(ctx).await?;
            }
        }
        self.0.retain(|group| !group.deleted && !(group.desired.is_none() && group.current.is_none()));
        Ok(())
    }

    /// Remove desired state from every member, turning the next reconcile
    /// pass into a full teardown
    pub fn strip_desired(&mut self) {
        for group in &mut self.0 {
            group.desired = None;
        }
    }

    #[cfg(test)]
    pub fn set_resolution(&mut self, service: &str, port: i64, arn: &str) {
        use super::targetgroup::TargetGroupState;
        use super::{Attributes, HealthCheck, Tags};

        self.0.push(TargetGroup {
            id: format!("test-{}", self.0.len()),
            service_name: service.to_string(),
            service_port: port,
            desired: None,
            current: Some(TargetGroupState {
                arn: arn.to_string(),
                name: "test".to_string(),
                port,
                protocol: "HTTP".to_string(),
                health_check: HealthCheck::default(),
                tags: Tags::new(),
                attributes: Attributes::new(),
                targets: vec![],
            }),
            deleted: false,
        });
    }
}
