//! # AWS Capability Traits
//!
//! Interface contracts for everything the reconcilers need from AWS,
//! split by resource kind so each reconciler declares exactly the
//! capability set it uses and tests can inject doubles without global
//! state.
//!
//! Implementations:
//! - [`elbv2::Elbv2Adapter`] - thin wrapper over the ELBv2 SDK client
//! - [`waf::WafAdapter`] - thin wrapper over the WAFv2 SDK client
//!
//! Each method is atomic and independently callable; paginated describe
//! operations are fully drained inside the adapter before the result is
//! returned.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::alb::listener::ListenerState;
use crate::alb::loadbalancer::LoadBalancerState;
use crate::alb::rule::{RuleCondition, RuleState};
use crate::alb::targetgroup::TargetGroupState;
use crate::alb::{Attributes, HealthCheck, Tags, Target};

pub mod elbv2;
pub mod waf;

#[cfg(test)]
pub mod mock;

/// The full capability set one reconcile pass draws from, bundled for
/// injection. Cheap to clone; production wiring points every field at the
/// two SDK adapters, tests at doubles.
#[derive(Clone)]
pub struct AwsServices {
    pub lb: Arc<dyn LoadBalancerOps>,
    pub tg: Arc<dyn TargetGroupOps>,
    pub listener: Arc<dyn ListenerOps>,
    pub rule: Arc<dyn RuleOps>,
    pub tag: Arc<dyn TagOps>,
    pub waf: Arc<dyn WafOps>,
}

impl std::fmt::Debug for AwsServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsServices").finish_non_exhaustive()
    }
}

/// Classified AWS API error.
///
/// Only two categories get special handling by the reconcilers: `NotFound`
/// on delete operations is treated as success, and `InUse` on target group
/// delete triggers the bounded fixed-interval retry loop. Everything else
/// propagates immediately.
#[derive(Debug, Error)]
pub enum AwsError {
    #[error("{operation}: resource not found: {message}")]
    NotFound {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: resource in use: {message}")]
    InUse {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_in_use(&self) -> bool {
        matches!(self, Self::InUse { .. })
    }
}

/// Load balancer lifecycle operations
#[async_trait]
pub trait LoadBalancerOps: Send + Sync {
    async fn create_load_balancer(
        &self,
        name: &str,
        scheme: &str,
        subnets: &[String],
        security_groups: &[String],
    ) -> Result<LoadBalancerState, AwsError>;

    /// Deleting a load balancer cascades listener deletion on the AWS
    /// side, but not target group deletion.
    async fn delete_load_balancer(&self, arn: &str) -> Result<(), AwsError>;

    async fn set_subnets(&self, arn: &str, subnets: &[String]) -> Result<(), AwsError>;

    async fn set_security_groups(&self, arn: &str, security_groups: &[String])
        -> Result<(), AwsError>;

    async fn modify_load_balancer_attributes(
        &self,
        arn: &str,
        attributes: &Attributes,
    ) -> Result<(), AwsError>;

    /// All load balancers in the account/region; pagination drained.
    /// Callers filter client-side by name prefix.
    async fn describe_load_balancers(&self) -> Result<Vec<LoadBalancerState>, AwsError>;
}

/// Target group lifecycle, membership and attribute operations
#[async_trait]
pub trait TargetGroupOps: Send + Sync {
    async fn create_target_group(
        &self,
        name: &str,
        port: i64,
        protocol: &str,
        health_check: &HealthCheck,
    ) -> Result<TargetGroupState, AwsError>;

    async fn modify_target_group(
        &self,
        arn: &str,
        health_check: &HealthCheck,
    ) -> Result<TargetGroupState, AwsError>;

    /// Idempotent on not-found at the call site, not here: the raw error
    /// is classified and returned so the reconciler can decide.
    async fn delete_target_group(&self, arn: &str) -> Result<(), AwsError>;

    async fn register_targets(&self, arn: &str, targets: &[Target]) -> Result<(), AwsError>;

    async fn deregister_targets(&self, arn: &str, targets: &[Target]) -> Result<(), AwsError>;

    async fn describe_target_health(&self, arn: &str) -> Result<Vec<Target>, AwsError>;

    async fn modify_target_group_attributes(
        &self,
        arn: &str,
        attributes: &Attributes,
    ) -> Result<(), AwsError>;

    /// Target groups attached to one load balancer; pagination drained.
    async fn describe_target_groups(&self, lb_arn: &str)
        -> Result<Vec<TargetGroupState>, AwsError>;
}

/// Listener lifecycle operations
#[async_trait]
pub trait ListenerOps: Send + Sync {
    async fn create_listener(
        &self,
        lb_arn: &str,
        port: i64,
        protocol: &str,
        certificate_arn: Option<&str>,
        default_target_group_arn: &str,
    ) -> Result<ListenerState, AwsError>;

    async fn modify_listener(
        &self,
        arn: &str,
        port: i64,
        protocol: &str,
        certificate_arn: Option<&str>,
        default_target_group_arn: &str,
    ) -> Result<ListenerState, AwsError>;

    async fn delete_listener(&self, arn: &str) -> Result<(), AwsError>;

    /// Listeners attached to one load balancer; pagination drained.
    async fn describe_listeners(&self, lb_arn: &str) -> Result<Vec<ListenerState>, AwsError>;
}

/// Listener rule lifecycle operations
#[async_trait]
pub trait RuleOps: Send + Sync {
    async fn create_rule(
        &self,
        listener_arn: &str,
        priority: i64,
        conditions: &[RuleCondition],
        target_group_arn: &str,
    ) -> Result<RuleState, AwsError>;

    async fn modify_rule(
        &self,
        arn: &str,
        conditions: &[RuleCondition],
        target_group_arn: &str,
    ) -> Result<RuleState, AwsError>;

    async fn delete_rule(&self, arn: &str) -> Result<(), AwsError>;

    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<RuleState>, AwsError>;
}

/// Tagging operations, shared by every taggable ELBv2 resource
#[async_trait]
pub trait TagOps: Send + Sync {
    async fn add_tags(&self, arn: &str, tags: &Tags) -> Result<(), AwsError>;

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<(), AwsError>;

    async fn describe_tags(&self, arn: &str) -> Result<Tags, AwsError>;
}

/// WAF web ACL association operations
#[async_trait]
pub trait WafOps: Send + Sync {
    async fn associate_web_acl(&self, web_acl_arn: &str, resource_arn: &str)
        -> Result<(), AwsError>;

    async fn disassociate_web_acl(&self, resource_arn: &str) -> Result<(), AwsError>;

    /// The ARN of the web ACL currently associated with the resource, if any
    async fn web_acl_for_resource(&self, resource_arn: &str) -> Result<Option<String>, AwsError>;
}
