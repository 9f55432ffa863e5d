//! # Listener Reconciler
//!
//! One listener per port per load balancer. The default action forwards
//! to a target group resolved from the desired default service at apply
//! time, which is also how the priority-0 "default rule" is realized.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::k8s::EventKind;

use super::plan::{plan, Plan};
use super::rules::Rules;
use super::targetgroups::TargetGroups;
use super::{ReconcileCtx, ReconcileError};

/// Desired side, derived from ingress annotations and backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub port: i64,
    pub protocol: String,
    pub certificate_arn: Option<String>,
    /// Default-action backend as `namespace/name`
    pub default_service: String,
    pub default_service_port: i64,
}

/// Current side, as last returned by the ELBv2 API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerState {
    pub arn: String,
    pub port: i64,
    pub protocol: String,
    pub certificate_arn: Option<String>,
    pub default_target_group_arn: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listener {
    pub desired: Option<ListenerSpec>,
    pub current: Option<ListenerState>,
    pub rules: Rules,
    #[serde(skip)]
    pub deleted: bool,
}

impl Listener {
    pub fn new(desired: ListenerSpec) -> Self {
        Self {
            desired: Some(desired),
            current: None,
            rules: Rules::default(),
            deleted: false,
        }
    }

    /// Listener identity within its load balancer
    pub fn port(&self) -> Option<i64> {
        self.desired
            .as_ref()
            .map(|d| d.port)
            .or_else(|| self.current.as_ref().map(|c| c.port))
    }

    fn needs_modification(
        desired: &ListenerSpec,
        current: &ListenerState,
        resolved_arn: Option<&str>,
    ) -> bool {
        if desired.port != current.port {
            return true;
        }
        if desired.protocol != current.protocol {
            return true;
        }
        if desired.certificate_arn != current.certificate_arn {
            return true;
        }
        match resolved_arn {
            None => true,
            Some(arn) => arn != current.default_target_group_arn,
        }
    }

    /// Reconcile the listener itself. Rules are reconciled separately by
    /// the owning collection, after this has produced a current ARN.
    pub async fn reconcile(
        &mut self,
        ctx: &ReconcileCtx,
        lb_arn: &str,
        target_groups: &TargetGroups,
    ) -> Result<(), ReconcileError> {
        let resolved = self.desired.as_ref().and_then(|d| {
            target_groups.arn_for_service(&d.default_service, d.default_service_port)
        });

        let selected = plan(self.desired.as_ref(), self.current.as_ref(), |d, c| {
            Self::needs_modification(d, c, resolved.as_deref())
        });

        match selected {
            Plan::NoOp => Ok(()),
            Plan::Delete => self.delete(ctx).await,
            Plan::Create => self.create(ctx, lb_arn, resolved).await,
            Plan::Modify => self.modify(ctx, resolved).await,
        }
    }

    async fn create(
        &mut self,
        ctx: &ReconcileCtx,
        lb_arn: &str,
        resolved: Option<String>,
    ) -> Result<(), ReconcileError> {
        let desired = self.desired.as_ref().expect("create plan implies desired");
        let default_arn = resolved.ok_or_else(|| {
            ReconcileError::MissingTargetGroupArn(desired.default_service.clone())
        })?;

        info!(port = desired.port, protocol = %desired.protocol, "Creating listener");
        let state = ctx
            .aws
            .listener
            .create_listener(
                lb_arn,
                desired.port,
                &desired.protocol,
                desired.certificate_arn.as_deref(),
                &default_arn,
            )
            .await
            .inspect_err(|e| {
                ctx.events.emit(
                    EventKind::Warning,
                    "CreateListenerFailed",
                    format!("Failed to create listener {}: {e}", desired.port),
                );
            })?;

        ctx.events.emit(
            EventKind::Normal,
            "CreatedListener",
            format!("Created {} listener on port {}", desired.protocol, desired.port),
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
        let default_arn = resolved.ok_or_else(|| {
            ReconcileError::MissingTargetGroupArn(desired.default_service.clone())
        })?;

        info!(port = desired.port, "Modifying listener");
        let state = ctx
            .aws
            .listener
            .modify_listener(
                &current.arn,
                desired.port,
                &desired.protocol,
                desired.certificate_arn.as_deref(),
                &default_arn,
            )
            .await
            .inspect_err(|e| {
                ctx.events.emit(
                    EventKind::Warning,
                    "ModifyListenerFailed",
                    format!("Failed to modify listener {}: {e}", desired.port),
                );
            })?;

        ctx.events.emit(
            EventKind::Normal,
            "ModifiedListener",
            format!("Modified listener on port {}", desired.port),
        );
        self.current = Some(state);
        Ok(())
    }

    async fn delete(&mut self, ctx: &ReconcileCtx) -> Result<(), ReconcileError> {
        let current = self.current.as_ref().expect("delete plan implies current");

        info!(port = current.port, "Deleting listener");
        match ctx.aws.listener.delete_listener(&current.arn).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Listener {} already gone", current.arn);
            }
            Err(e) => {
                ctx.events.emit(
                    EventKind::Warning,
                    "DeleteListenerFailed",
                    format!("Failed to delete listener {}: {e}", current.port),
                );
                return Err(e.into());
            }
        }

        ctx.events.emit(
            EventKind::Normal,
            "DeletedListener",
            format!("Deleted listener on port {}", current.port),
        );
        self.deleted = true;
        Ok(())
    }
}
