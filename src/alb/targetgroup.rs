//! # Target Group Reconciler
//!
//! A target group fronts one (service, port, protocol) backend within the
//! cluster. Identity is hashed from those stable fields, so the same
//! logical backend always maps to the same cloud object across reconcile
//! cycles and controller restarts. Health checks, tags, attributes and
//! target membership are all mutable in place and reconciled separately.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::{TARGET_GROUP_DELETE_ATTEMPTS, TARGET_GROUP_DELETE_INTERVAL_SECS};
use crate::k8s::EventKind;

use super::plan::{plan, Plan};
use super::tags::diff;
use super::{Attributes, HealthCheck, ReconcileCtx, ReconcileError, Tags, Target};

/// Desired side, derived from the ingress backend and live cluster state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupSpec {
    /// Port targets receive traffic on (the service's node port)
    pub port: i64,
    pub protocol: String,
    pub health_check: HealthCheck,
    pub tags: Tags,
    pub attributes: Attributes,
    pub targets: Vec<Target>,
}

/// Current side, as last returned by the ELBv2 API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupState {
    pub arn: String,
    pub name: String,
    pub port: i64,
    pub protocol: String,
    pub health_check: HealthCheck,
    pub tags: Tags,
    pub attributes: Attributes,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetGroup {
    /// Stable AWS resource name, see [`super::id::target_group_name`]
    pub id: String,
    /// Backing service as `namespace/name`
    pub service_name: String,
    /// Service port the ingress backend references
    pub service_port: i64,
    pub desired: Option<TargetGroupSpec>,
    pub current: Option<TargetGroupState>,
    #[serde(skip)]
    pub deleted: bool,
}

impl TargetGroup {
    pub fn arn(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.arn.as_str())
    }

    /// Field-by-field comparison, short-circuiting on the first
    /// difference. Target order is not drift; membership is.
    fn needs_modification(desired: &TargetGroupSpec, current: &TargetGroupState) -> bool {
        if desired.health_check != current.health_check {
            return true;
        }
        if target_set(&desired.targets) != target_set(&current.targets) {
            return true;
        }
        if !diff(&desired.tags, &current.tags).is_empty() {
            return true;
        }
        if !diff(&desired.attributes, &current.attributes).is_empty() {
            return true;
        }
        false
    }

    pub async fn reconcile(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        let selected = plan(
            self.desired.as_ref(),
            self.current.as_ref(),
            Self::needs_modification,
        );

        match selected {
            Plan::NoOp => Ok(()),
            Plan::Delete => self.delete(ctx).await,
            Plan::Create => self.create(ctx).await,
            Plan::Modify => self.modify(ctx).await,
        }
    }

    async fn create(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        let desired = self.desired.clone().expect("create plan implies desired");

        info!(target_group = %self.id, service = %self.service_name, "Creating target group");
        let mut state = ctx
            .aws
            .tg
            .create_target_group(&self.id, desired.port, &desired.protocol, &desired.health_check)
            .await
            .inspect_err(|e| {
                ctx.events.emit(
                    EventKind::Warning,
                    "CreateTargetGroupFailed",
                    format!("Failed to create target group {}: {e}", self.id),
                );
            })?;

        // The API does not echo every health check field back (path in
        // particular can come back empty); re-apply the desired values so
        // the next comparison does not see phantom drift
        state.health_check = desired.health_check.clone();

        if !desired.tags.is_empty() {
            ctx.aws.tag.add_tags(&state.arn, &desired.tags).await?;
            state.tags = desired.tags.clone();
        }
        if !desired.attributes.is_empty() {
            ctx.aws
                .tg
                .modify_target_group_attributes(&state.arn, &desired.attributes)
                .await?;
            state.attributes = desired.attributes.clone();
        }
        if !desired.targets.is_empty() {
            ctx.aws.tg.register_targets(&state.arn, &desired.targets).await?;
            state.targets = desired.targets.clone();
        }

        ctx.events.emit(
            EventKind::Normal,
            "CreatedTargetGroup",
            format!("Created target group {} for {}", self.id, self.service_name),
        );
        self.current = Some(state);
        Ok(())
    }

    async fn modify(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        let desired = self.desired.clone().expect("modify plan implies desired");
        let mut state = self.current.clone().expect("modify plan implies current");
        let mut touched = Vec::new();

        if desired.health_check != state.health_check {
            let updated = ctx
                .aws
                .tg
                .modify_target_group(&state.arn, &desired.health_check)
                .await?;
            state.health_check = desired.health_check.clone();
            state.port = updated.port;
            touched.push("health check");
        }

        let desired_targets = target_set(&desired.targets);
        let current_targets = target_set(&state.targets);
        if desired_targets != current_targets {
            let to_register: Vec<Target> = desired_targets
                .difference(&current_targets)
                .cloned()
                .collect();
            let to_deregister: Vec<Target> = current_targets
                .difference(&desired_targets)
                .cloned()
                .collect();
            if !to_register.is_empty() {
                ctx.aws.tg.register_targets(&state.arn, &to_register).await?;
            }
            if !to_deregister.is_empty() {
                ctx.aws.tg.deregister_targets(&state.arn, &to_deregister).await?;
            }
            state.targets = desired.targets.clone();
            touched.push("targets");
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
                .tg
                .modify_target_group_attributes(&state.arn, &attr_diff.to_upsert)
                .await?;
            state.attributes = desired.attributes.clone();
            touched.push("attributes");
        }

        if !touched.is_empty() {
            ctx.events.emit(
                EventKind::Normal,
                "ModifiedTargetGroup",
                format!("Modified target group {} ({})", self.id, touched.join(", ")),
            );
        }
        self.current = Some(state);
        Ok(())
    }

    /// Delete the cloud target group.
    ///
    /// "Already not found" is success. `ResourceInUse` is retried a bounded
    /// number of times with a fixed sleep (a listener rule elsewhere may
    /// still reference the group mid-delete); any other error aborts
    /// immediately. On success the `deleted` flag is set; `current` is left
    /// in place for the owning collection to filter.
    pub(crate) async fn delete(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        let arn = self
            .current
            .as_ref()
            .expect("delete requires current")
            .arn
            .clone();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match ctx.aws.tg.delete_target_group(&arn).await {
                Ok(()) => break,
                Err(e) if e.is_not_found() => {
                    debug!(target_group = %self.id, "Target group already gone");
                    break;
                }
                Err(e) if e.is_in_use() => {
                    if attempt >= TARGET_GROUP_DELETE_ATTEMPTS {
                        ctx.events.emit(
                            EventKind::Warning,
                            "DeleteTargetGroupFailed",
                            format!(
                                "Target group {} still in use after {attempt} delete attempts",
                                self.id
                            ),
                        );
                        return Err(ReconcileError::DeleteRetriesExhausted { arn, attempts: attempt });
                    }
                    warn!(
                        target_group = %self.id,
                        attempt,
                        "Target group still in use, retrying delete"
                    );
                    tokio::time::sleep(Duration::from_secs(TARGET_GROUP_DELETE_INTERVAL_SECS))
                        .await;
                }
                Err(e) => {
                    ctx.events.emit(
                        EventKind::Warning,
                        "DeleteTargetGroupFailed",
                        format!("Failed to delete target group {}: {e}", self.id),
                    );
                    return Err(e.into());
                }
            }
        }

        ctx.events.emit(
            EventKind::Normal,
            "DeletedTargetGroup",
            format!("Deleted target group {}", self.id),
        );
        self.deleted = true;
        Ok(())
    }
}

fn target_set(targets: &[Target]) -> BTreeSet<Target> {
    targets.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::aws::mock::MockAws;
    use crate::k8s::test_support::RecordingEvents;

    fn ctx(mock: &Arc<MockAws>) -> ReconcileCtx {
        ReconcileCtx {
            aws: mock.services(),
            events: Arc::new(RecordingEvents::default()),
        }
    }

    fn target(id: &str) -> Target {
        Target {
            id: id.to_string(),
            port: 30080,
        }
    }

    fn group_with_current() -> TargetGroup {
        TargetGroup {
            id: "prod-abc123".to_string(),
            service_name: "default/api".to_string(),
            service_port: 80,
            desired: None,
            current: Some(TargetGroupState {
                arn: "arn:tg/prod-abc123".to_string(),
                name: "prod-abc123".to_string(),
                port: 30080,
                protocol: "HTTP".to_string(),
                health_check: HealthCheck::default(),
                tags: Tags::new(),
                attributes: Attributes::new(),
                targets: vec![target("i-1")],
            }),
            deleted: false,
        }
    }

    #[test]
    fn test_needs_modification_on_health_check_change() {
        let mut desired = TargetGroupSpec {
            port: 30080,
            protocol: "HTTP".to_string(),
            health_check: HealthCheck::default(),
            tags: Tags::new(),
            attributes: Attributes::new(),
            targets: vec![],
        };
        let current = TargetGroupState {
            arn: "arn:tg".to_string(),
            name: "tg".to_string(),
            port: 30080,
            protocol: "HTTP".to_string(),
            health_check: HealthCheck::default(),
            tags: Tags::new(),
            attributes: Attributes::new(),
            targets: vec![],
        };
        assert!(!TargetGroup::needs_modification(&desired, &current));

        desired.health_check.path = "/healthz".to_string();
        assert!(TargetGroup::needs_modification(&desired, &current));
    }

    #[test]
    fn test_target_reorder_is_not_drift() {
        let desired = TargetGroupSpec {
            port: 30080,
            protocol: "HTTP".to_string(),
            health_check: HealthCheck::default(),
            tags: Tags::new(),
            attributes: Attributes::new(),
            targets: vec![target("i-2"), target("i-1")],
        };
        let current = TargetGroupState {
            arn: "arn:tg".to_string(),
            name: "tg".to_string(),
            port: 30080,
            protocol: "HTTP".to_string(),
            health_check: HealthCheck::default(),
            tags: Tags::new(),
            attributes: Attributes::new(),
            targets: vec![target("i-1"), target("i-2")],
        };
        assert!(!TargetGroup::needs_modification(&desired, &current));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_in_use_retries_then_succeeds() {
        let mock = Arc::new(MockAws::default());
        mock.fail_tg_delete_in_use(3);
        let mut group = group_with_current();

        group.delete(&ctx(&mock)).await.expect("delete should succeed");

        assert!(group.deleted);
        let deletes = mock
            .calls()
            .iter()
            .filter(|c| c.starts_with("DeleteTargetGroup"))
            .count();
        assert_eq!(deletes, 4, "3 in-use failures then one success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_in_use_exhausts_attempts() {
        let mock = Arc::new(MockAws::default());
        mock.fail_tg_delete_in_use(u32::MAX);
        let mut group = group_with_current();

        let err = group
            .delete(&ctx(&mock))
            .await
            .expect_err("delete must exhaust retries");

        assert!(matches!(
            err,
            ReconcileError::DeleteRetriesExhausted {
                attempts: TARGET_GROUP_DELETE_ATTEMPTS,
                ..
            }
        ));
        let deletes = mock
            .calls()
            .iter()
            .filter(|c| c.starts_with("DeleteTargetGroup"))
            .count();
        assert_eq!(deletes, TARGET_GROUP_DELETE_ATTEMPTS as usize);
        assert!(!group.deleted);
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let mock = Arc::new(MockAws::default());
        mock.fail_tg_delete_not_found();
        let mut group = group_with_current();

        group.delete(&ctx(&mock)).await.expect("not-found is success");
        assert!(group.deleted);
    }

    #[tokio::test]
    async fn test_modify_converges_target_membership() {
        let mock = Arc::new(MockAws::default());
        let mut group = group_with_current();
        group.desired = Some(TargetGroupSpec {
            port: 30080,
            protocol: "HTTP".to_string(),
            health_check: HealthCheck::default(),
            tags: Tags::new(),
            attributes: Attributes::new(),
            targets: vec![target("i-2")],
        });

        group.reconcile(&ctx(&mock)).await.expect("reconcile should succeed");

        let calls = mock.calls();
        assert!(calls.iter().any(|c| c.starts_with("RegisterTargets") && c.contains("i-2")));
        assert!(calls.iter().any(|c| c.starts_with("DeregisterTargets") && c.contains("i-1")));
        assert_eq!(
            group.current.as_ref().map(|c| c.targets.clone()),
            Some(vec![target("i-2")])
        );
    }

    #[tokio::test]
    async fn test_reconcile_idempotent_after_create() {
        let mock = Arc::new(MockAws::default());
        let mut group = TargetGroup {
            id: "prod-abc123".to_string(),
            service_name: "default/api".to_string(),
            service_port: 80,
            desired: Some(TargetGroupSpec {
                port: 30080,
                protocol: "HTTP".to_string(),
                health_check: HealthCheck::default(),
                tags: Tags::from([("Name".to_string(), "prod-abc123".to_string())]),
                attributes: Attributes::new(),
                targets: vec![target("i-1")],
            }),
            current: None,
            deleted: false,
        };

        group.reconcile(&ctx(&mock)).await.expect("first pass should succeed");
        let after_create = mock.calls().len();
        assert!(after_create > 0);

        group.reconcile(&ctx(&mock)).await.expect("second pass should succeed");
        assert_eq!(mock.calls().len(), after_create, "second pass makes no calls");
    }
}
