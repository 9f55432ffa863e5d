//! # Load Balancer Reconciler
//!
//! Root of the resource tree. One reconcile pass settles the load
//! balancer itself, then its children in dependency order: target groups
//! first (rules and default actions forward to them), listeners and their
//! rules next, the orphan target group sweep and WAF association last.
//!
//! Unlike the lower layers, errors here are aggregated instead of
//! short-circuited: a failed listener pass must not prevent the WAF
//! association or the teardown of an unrelated target group from being
//! attempted on the same cycle.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::k8s::EventKind;

use super::listeners::Listeners;
use super::plan::{plan, Plan};
use super::tags::diff;
use super::targetgroups::TargetGroups;
use super::{Attributes, ReconcileCtx, ReconcileError, Tags};

/// Desired side, derived from ingress annotations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    /// `internet-facing` or `internal`; immutable after creation
    pub scheme: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub tags: Tags,
    pub attributes: Attributes,
    pub web_acl_arn: Option<String>,
}

/// Current side, as last returned by the ELBv2 API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerState {
    pub arn: String,
    pub name: String,
    pub dns_name: String,
    pub scheme: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub tags: Tags,
    pub attributes: Attributes,
    /// Tracked locally after (dis)association so a steady-state pass
    /// makes no WAF API calls
    pub web_acl_arn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancer {
    /// Stable AWS resource name, see [`super::id::load_balancer_name`]
    pub id: String,
    pub desired: Option<LoadBalancerSpec>,
    pub current: Option<LoadBalancerState>,
    pub target_groups: TargetGroups,
    pub listeners: Listeners,
    #[serde(skip)]
    pub deleted: bool,
}

impl LoadBalancer {
    pub fn arn(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.arn.as_str())
    }

    pub fn dns_name(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.dns_name.as_str())
    }

    fn needs_modification(desired: &LoadBalancerSpec, current: &LoadBalancerState) -> bool {
        if desired.scheme != current.scheme {
            return true;
        }
        if sorted(&desired.subnets) != sorted(&current.subnets) {
            return true;
        }
        if sorted(&desired.security_groups) != sorted(&current.security_groups) {
            return true;
        }
        if !diff(&desired.tags, &current.tags).is_empty() {
            return true;
        }
        if !diff(&desired.attributes, &current.attributes)
            .to_upsert
            .is_empty()
        {
            return true;
        }
        desired.web_acl_arn != current.web_acl_arn
    }

    /// One full convergence pass over the tree. Every error is recorded
    /// and the pass moves on to the next independent step; an empty vec
    /// means the tree converged.
    pub async fn reconcile(&mut self, ctx: &ReconcileCtx) -> Vec<ReconcileError> {
        let mut errors = Vec::new();

        let selected = plan(
            self.desired.as_ref(),
            self.current.as_ref(),
            Self::needs_modification,
        );

        match selected {
            Plan::NoOp => {
                // A teardown interrupted after the load balancer was
                // deleted leaves target groups behind with no desired
                // side; keep deleting them until the tree is gone
                if self.desired.is_none() && !self.deleted && self.target_groups.has_current() {
                    if let Err(e) = self.delete(ctx).await {
                        errors.push(e);
                    }
                    return errors;
                }
            }
            Plan::Delete => {
                if let Err(e) = self.delete(ctx).await {
                    errors.push(e);
                }
                return errors;
            }
            Plan::Create => {
                if let Err(e) = self.create(ctx).await {
                    errors.push(e);
                    // Children cannot reconcile without a load balancer ARN
                    return errors;
                }
            }
            Plan::Modify => {
                if let Err(e) = self.modify(ctx).await {
                    errors.push(e);
                }
            }
        }

        let Some(lb_arn) = self.arn().map(str::to_string) else {
            return errors;
        };

        // Target groups before listeners: rules and default actions need
        // their ARNs resolvable at apply time
        if let Err(e) = self.target_groups.reconcile(ctx).await {
            errors.push(e);
        }
        if let Err(e) = self
            .listeners
            .reconcile(ctx, &lb_arn, &self.target_groups)
            .await
        {
            errors.push(e);
        }
        if let Err(e) = self.target_groups.prune_unused(ctx, &self.listeners).await {
            errors.push(e);
        }
        if let Err(e) = self.reconcile_web_acl(ctx, &lb_arn).await {
            errors.push(e);
        }

        errors
    }

    async fn create(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        let desired = self.desired.clone().expect("create plan implies desired");

        info!(load_balancer = %self.id, scheme = %desired.scheme, "Creating load balancer");
        let mut state = ctx
            .aws
            .lb
            .create_load_balancer(
                &self.id,
                &desired.scheme,
                &desired.subnets,
                &desired.security_groups,
            )
            .await
            .inspect_err(|e| {
                ctx.events.emit(
                    EventKind::Warning,
                    "CreateLoadBalancerFailed",
                    format!("Failed to create load balancer {}: {e}", self.id),
                );
            })?;

        if !desired.tags.is_empty() {
            ctx.aws.tag.add_tags(&state.arn, &desired.tags).await?;
            state.tags = desired.tags.clone();
        }
        if !desired.attributes.is_empty() {
            ctx.aws
                .lb
                .modify_load_balancer_attributes(&state.arn, &desired.attributes)
                .await?;
            state.attributes = desired.attributes.clone();
        }

        ctx.events.emit(
            EventKind::Normal,
            "CreatedLoadBalancer",
            format!("Created load balancer {} ({})", self.id, state.dns_name),
        );
        self.current = Some(state);
        Ok(())
    }

    async fn modify(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        let desired = self.desired.clone().expect("modify plan implies desired");
        let mut state = self.current.clone().expect("modify plan implies current");
        let mut touched = Vec::new();

        if desired.scheme != state.scheme {
            ctx.events.emit(
                EventKind::Warning,
                "SchemeImmutable",
                format!(
                    "Load balancer scheme cannot change from {} to {}; recreate the ingress",
                    state.scheme, desired.scheme
                ),
            );
            return Err(ReconcileError::SchemeImmutable {
                current: state.scheme,
                desired: desired.scheme,
            });
        }

        if sorted(&desired.subnets) != sorted(&state.subnets) {
            ctx.aws.lb.set_subnets(&state.arn, &desired.subnets).await?;
            state.subnets = desired.subnets.clone();
            touched.push("subnets");
        }

        if sorted(&desired.security_groups) != sorted(&state.security_groups) {
            ctx.aws
                .lb
                .set_security_groups(&state.arn, &desired.security_groups)
                .await?;
            state.security_groups = desired.security_groups.clone();
            touched.push("security groups");
        }

        let tag_diff = diff(&desired.tags, &state.tags);
        if !tag_diff.is_empty() {
            if !tag_diff.to_upsert.is_empty() {
                ctx.aws.tag.add_tags(&state.arn, &tag_diff.to_upsert).await?;
            }
            if !tag_diff.to_remove.is_empty() {
                let keys: Vec<String> = tag_diff.to_remove.keys().cloned().collect();
                ctx.aws.tag.remove_tags(&state.arn, &keys).await?;
            }
            state.tags = desired.tags.clone();
            touched.push("tags");
        }

        let attr_diff = diff(&desired.attributes, &state.attributes);
        if !attr_diff.to_upsert.is_empty() {
            ctx.aws
                .lb
                .modify_load_balancer_attributes(&state.arn, &attr_diff.to_upsert)
                .await?;
            state.attributes = desired.attributes.clone();
            touched.push("attributes");
        }

        if !touched.is_empty() {
            info!(load_balancer = %self.id, ?touched, "Modified load balancer");
            ctx.events.emit(
                EventKind::Normal,
                "ModifiedLoadBalancer",
                format!("Modified load balancer {} ({})", self.id, touched.join(", ")),
            );
        }
        self.current = Some(state);
        Ok(())
    }

    /// Full teardown: the load balancer first (AWS cascades listener and
    /// rule deletion), then every target group. The `deleted` flag only
    /// flips once everything is gone, so a partial failure leaves the
    /// remains visible for the next pass.
    async fn delete(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        if let Some(current) = &self.current {
            info!(load_balancer = %self.id, "Deleting load balancer");
            match ctx.aws.lb.delete_load_balancer(&current.arn).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(load_balancer = %self.id, "Load balancer already gone");
                }
                Err(e) => {
                    ctx.events.emit(
                        EventKind::Warning,
                        "DeleteLoadBalancerFailed",
                        format!("Failed to delete load balancer {}: {e}", self.id),
                    );
                    return Err(e.into());
                }
            }
            self.current = None;
        }

        // Listener deletion is cascaded by AWS; drop the local records
        self.listeners = Listeners::default();

        self.target_groups.strip_desired();
        self.target_groups.reconcile(ctx).await?;

        ctx.events.emit(
            EventKind::Normal,
            "DeletedLoadBalancer",
            format!("Deleted load balancer {}", self.id),
        );
        self.deleted = true;
        Ok(())
    }

    /// Converge the WAF web ACL association. Comparison runs against the
    /// locally tracked current side only, so a settled tree makes no WAF
    /// API calls at all.
    async fn reconcile_web_acl(
        &mut self,
        ctx: &ReconcileCtx,
        lb_arn: &str,
    ) -> Result<(), ReconcileError> {
        let desired_acl = self.desired.as_ref().and_then(|d| d.web_acl_arn.clone());
        let current_acl = self.current.as_ref().and_then(|c| c.web_acl_arn.clone());

        if desired_acl == current_acl {
            return Ok(());
        }

        match &desired_acl {
            Some(acl) => {
                info!(load_balancer = %self.id, web_acl = %acl, "Associating web ACL");
                ctx.aws.waf.associate_web_acl(acl, lb_arn).await?;
                ctx.events.emit(
                    EventKind::Normal,
                    "AssociatedWebAcl",
                    format!("Associated web ACL with load balancer {}", self.id),
                );
            }
            None => {
                info!(load_balancer = %self.id, "Disassociating web ACL");
                ctx.aws.waf.disassociate_web_acl(lb_arn).await?;
                ctx.events.emit(
                    EventKind::Normal,
                    "DisassociatedWebAcl",
                    format!("Disassociated web ACL from load balancer {}", self.id),
                );
            }
        }

        if let Some(current) = &mut self.current {
            current.web_acl_arn = desired_acl;
        }
        Ok(())
    }

    /// Remove desired state from the whole tree; the next reconcile pass
    /// becomes a teardown
    pub fn strip_desired(&mut self) {
        self.desired = None;
        self.target_groups.strip_desired();
        self.listeners.strip_desired();
    }
}

fn sorted(values: &[String]) -> Vec<&String> {
    let mut v: Vec<&String> = values.iter().collect();
    v.sort();
    v
}
