//! # Rule Reconciler
//!
//! A listener rule: a priority-ordered match condition (host-header,
//! path-pattern) forwarding to a target group. Priority is identity; one
//! rule per priority per listener. Priority 0 is the default-rule
//! sentinel - default rules are owned by their listener's default action
//! and are never independently created or deleted through the rule API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::DEFAULT_RULE_PRIORITY;
use crate::k8s::EventKind;

use super::plan::{plan, Plan};
use super::targetgroups::TargetGroups;
use super::{ReconcileCtx, ReconcileError};

/// A single match condition. `field` is `host-header` or `path-pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub values: Vec<String>,
}

/// Desired side, derived from one ingress rule path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub priority: i64,
    /// Backing service as `namespace/name`; resolved to a target group ARN
    /// at apply time
    pub service_name: String,
    pub service_port: i64,
    pub conditions: Vec<RuleCondition>,
}

/// Current side, as last returned by the ELBv2 API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleState {
    pub arn: String,
    pub priority: i64,
    pub target_group_arn: String,
    pub conditions: Vec<RuleCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    pub desired: Option<RuleSpec>,
    pub current: Option<RuleState>,
    /// Set once the cloud counterpart is gone; the owning collection
    /// filters flagged rules out after the pass
    #[serde(skip)]
    pub deleted: bool,
}

impl Rule {
    pub fn new(desired: RuleSpec) -> Self {
        Self {
            desired: Some(desired),
            current: None,
            deleted: false,
        }
    }

    /// Rule identity within its listener
    pub fn priority(&self) -> Option<i64> {
        self.desired
            .as_ref()
            .map(|d| d.priority)
            .or_else(|| self.current.as_ref().map(|c| c.priority))
    }

    /// Default rules are bound to the listener's default action
    pub fn is_default(&self) -> bool {
        self.priority() == Some(DEFAULT_RULE_PRIORITY)
    }

    /// Condition sets compare as unordered multisets keyed by field, so
    /// reordering conditions never triggers a spurious modification. The
    /// resolved backing target group is tracked separately.
    fn needs_modification(desired: &RuleSpec, current: &RuleState, resolved_arn: Option<&str>) -> bool {
        if normalize_conditions(&desired.conditions) != normalize_conditions(&current.conditions) {
            return true;
        }
        match resolved_arn {
            // Unresolvable service counts as drift; the create/modify path
            // surfaces the real error
            None => true,
            Some(arn) => arn != current.target_group_arn,
        }
    }

    pub async fn reconcile(
        &mut self,
        ctx: &ReconcileCtx,
        listener_arn: &str,
        target_groups: &TargetGroups,
    ) -> Result<(), ReconcileError> {
        let resolved = self.desired.as_ref().and_then(|d| {
            target_groups.arn_for_service(&d.service_name, d.service_port)
        });

        let selected = plan(self.desired.as_ref(), self.current.as_ref(), |d, c| {
            Self::needs_modification(d, c, resolved.as_deref())
        });

        match selected {
            Plan::NoOp => Ok(()),
            Plan::Delete => self.delete(ctx).await,
            Plan::Create => self.create(ctx, listener_arn, resolved).await,
            Plan::Modify => self.modify(ctx, resolved).await,
        }
    }

    async fn create(
        &mut self,
        ctx: &ReconcileCtx,
        listener_arn: &str,
        resolved: Option<String>,
    ) -> Result<(), ReconcileError> {
        let desired = self.desired.as_ref().expect("create plan implies desired");
        let target_group_arn = resolved.ok_or_else(|| {
            ReconcileError::MissingTargetGroupArn(desired.service_name.clone())
        })?;

        info!(
            priority = desired.priority,
            service = %desired.service_name,
            "Creating listener rule"
        );
        let state = ctx
            .aws
            .rule
            .create_rule(
                listener_arn,
                desired.priority,
                &desired.conditions,
                &target_group_arn,
            )
            .await
            .inspect_err(|e| {
                ctx.events.emit(
                    EventKind::Warning,
                    "CreateRuleFailed",
                    format!("Failed to create rule {}: {e}", desired.priority),
                );
            })?;

        ctx.events.emit(
            EventKind::Normal,
            "CreatedRule",
            format!(
                "Created rule {} forwarding to {}",
                desired.priority, desired.service_name
            ),
        );
        self.current = Some(state);
        Ok(())
    }

    async fn modify(
        &mut self,
        ctx: &ReconcileCtx,
        resolved: Option<String>,
    ) -> Result<(), ReconcileError> {
        let desired = self.desired.as_ref().expect("modify plan implies desired");
        let current = self.current.as_ref().expect("modify plan implies current");
        let target_group_arn = resolved.ok_or_else(|| {
            ReconcileError::MissingTargetGroupArn(desired.service_name.clone())
        })?;

        info!(priority = desired.priority, "Modifying listener rule");
        let mut state = ctx
            .aws
            .rule
            .modify_rule(&current.arn, &desired.conditions, &target_group_arn)
            .await
            .inspect_err(|e| {
                ctx.events.emit(
                    EventKind::Warning,
                    "ModifyRuleFailed",
                    format!("Failed to modify rule {}: {e}", desired.priority),
                );
            })?;
        // ModifyRule does not take a priority, so the echoed state cannot
        // change it; keep the identity we already hold
        state.priority = desired.priority;

        ctx.events.emit(
            EventKind::Normal,
            "ModifiedRule",
            format!("Modified rule {}", desired.priority),
        );
        self.current = Some(state);
        Ok(())
    }

    async fn delete(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        if self.is_default() {
            // Removed implicitly with the listener's default action
            debug!("Skipping delete of default rule");
            self.deleted = true;
            return Ok(());
        }

        let current = self.current.as_ref().expect("delete plan implies current");
        info!(priority = current.priority, "Deleting listener rule");
        match ctx.aws.rule.delete_rule(&current.arn).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Rule {} already gone", current.arn);
            }
            Err(e) => {
                ctx.events.emit(
                    EventKind::Warning,
                    "DeleteRuleFailed",
                    format!("Failed to delete rule {}: {e}", current.priority),
                );
                return Err(e.into());
            }
        }

        ctx.events.emit(
            EventKind::Normal,
            "DeletedRule",
            format!("Deleted rule {}", current.priority),
        );
        self.deleted = true;
        Ok(())
    }
}

/// Multiset view of a condition list: field → sorted values, insertion
/// order erased
fn normalize_conditions(conditions: &[RuleCondition]) -> BTreeMap<String, Vec<String>> {
    let mut normalized: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for condition in conditions {
        normalized
            .entry(condition.field.clone())
            .or_default()
            .extend(condition.values.iter().cloned());
    }
    for values in normalized.values_mut() {
        values.sort();
    }
    normalized
}
