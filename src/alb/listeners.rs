//! # Listeners Collection Reconciler
//!
//! Reconciles every listener owned by one load balancer, then each
//! listener's rules against the listener's settled ARN. Also aggregates
//! the forwarding references the orphan target group sweep consults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::listener::Listener;
use super::targetgroups::TargetGroups;
use super::{ReconcileCtx, ReconcileError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listeners(pub Vec<Listener>);

impl Listeners {
    /// Reconcile listeners in stored order, rules directly after their
    /// owning listener. A listener without a current ARN (e.g. its delete
    /// just succeeded) skips rule reconciliation for this pass.
    pub async fn reconcile(
        &mut self,
        ctx: &ReconcileCtx,
        lb_arn: &str,
        target_groups: &TargetGroups,
    ) -> Result<(), ReconcileError> {
        for listener in &mut self.0 {
            listener.reconcile(ctx, lb_arn, target_groups).await?;
            if listener.deleted {
                continue;
            }
            if let Some(current) = listener.current.clone() {
                listener.rules.reconcile(ctx, &current.arn, target_groups).await?;
            }
        }
        self.0.retain(|listener| !listener.deleted);
        Ok(())
    }

    /// Target group ARNs referenced by any rule forwarding action or any
    /// listener default action on the current side
    pub fn referenced_target_group_arns(&self) -> BTreeSet<String> {
        let mut arns = BTreeSet::new();
        for listener in &self.0 {
            if let Some(current) = &listener.current {
                arns.insert(current.default_target_group_arn.clone());
            }
            arns.extend(listener.rules.referenced_target_group_arns());
        }
        arns
    }

    /// Backing (service, port) pairs referenced by any desired rule or
    /// desired default action
    pub fn referenced_services(&self) -> BTreeSet<(String, i64)> {
        let mut services = BTreeSet::new();
        for listener in &self.0 {
            if let Some(desired) = &listener.desired {
                services.insert((desired.default_service.clone(), desired.default_service_port));
            }
            services.extend(listener.rules.referenced_services());
        }
        services
    }

    /// Locate a listener by its port identity
    pub fn find_mut(&mut self, port: i64) -> Option<&mut Listener> {
        self.0.iter_mut().find(|l| l.port() == Some(port))
    }

    /// Remove desired state from every listener and rule, turning the next
    /// reconcile pass into a full teardown
    pub fn strip_desired(&mut self) {
        for listener in &mut self.0 {
            listener.desired = None;
            for rule in &mut listener.rules.0 {
                rule.desired = None;
            }
        }
    }
}
