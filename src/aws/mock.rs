//! # In-Memory AWS Double
//!
//! Records every operation as a `"OperationName arg arg"` line and hands
//! back deterministic states, so reconciler tests can assert on exact
//! call sequences. Describe results and failure behavior are scriptable
//! per test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::alb::listener::ListenerState;
use crate::alb::loadbalancer::LoadBalancerState;
use crate::alb::rule::{RuleCondition, RuleState};
use crate::alb::targetgroup::TargetGroupState;
use crate::alb::{Attributes, HealthCheck, Tags, Target};

use super::{
    AwsError, AwsServices, ListenerOps, LoadBalancerOps, RuleOps, TagOps, TargetGroupOps, WafOps,
};

#[derive(Default)]
pub struct MockAws {
    calls: Mutex<Vec<String>>,
    arn_counter: AtomicU64,

    tg_delete_in_use_remaining: Mutex<u32>,
    tg_delete_not_found: AtomicBool,
    listener_delete_not_found: AtomicBool,

    // Scriptable describe results, keyed by the owning resource ARN
    pub load_balancers: Mutex<Vec<LoadBalancerState>>,
    pub target_groups: Mutex<HashMap<String, Vec<TargetGroupState>>>,
    pub listeners: Mutex<HashMap<String, Vec<ListenerState>>>,
    pub rules: Mutex<HashMap<String, Vec<RuleState>>>,
    pub tags: Mutex<HashMap<String, Tags>>,
    pub target_health: Mutex<HashMap<String, Vec<Target>>>,
    pub web_acls: Mutex<HashMap<String, String>>,
}

impl MockAws {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Bundle this double into every capability slot
    pub fn services(self: &Arc<Self>) -> AwsServices {
        AwsServices {
            lb: Arc::clone(self) as Arc<dyn LoadBalancerOps>,
            tg: Arc::clone(self) as Arc<dyn TargetGroupOps>,
            listener: Arc::clone(self) as Arc<dyn ListenerOps>,
            rule: Arc::clone(self) as Arc<dyn RuleOps>,
            tag: Arc::clone(self) as Arc<dyn TagOps>,
            waf: Arc::clone(self) as Arc<dyn WafOps>,
        }
    }

    /// The next `n` target group deletes fail with `InUse`
    pub fn fail_tg_delete_in_use(&self, n: u32) {
        *self.tg_delete_in_use_remaining.lock().expect("lock") = n;
    }

    /// Every target group delete fails with `NotFound`
    pub fn fail_tg_delete_not_found(&self) {
        self.tg_delete_not_found.store(true, Ordering::SeqCst);
    }

    /// Every listener delete fails with `NotFound`
    pub fn fail_listener_delete_not_found(&self) {
        self.listener_delete_not_found.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn next_arn(&self, kind: &str, name: &str) -> String {
        let n = self.arn_counter.fetch_add(1, Ordering::SeqCst);
        format!("arn:mock:{kind}/{name}/{n}")
    }
}

#[async_trait]
impl LoadBalancerOps for MockAws {
    async fn create_load_balancer(
        &self,
        name: &str,
        scheme: &str,
        subnets: &[String],
        security_groups: &[String],
    ) -> Result<LoadBalancerState, AwsError> {
        self.record(format!("CreateLoadBalancer {name}"));
        Ok(LoadBalancerState {
            arn: self.next_arn("loadbalancer", name),
            name: name.to_string(),
            dns_name: format!("{name}.elb.mock"),
            scheme: scheme.to_string(),
            subnets: subnets.to_vec(),
            security_groups: security_groups.to_vec(),
            tags: Tags::new(),
            attributes: Attributes::new(),
            web_acl_arn: None,
        })
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<(), AwsError> {
        self.record(format!("DeleteLoadBalancer {arn}"));
        Ok(())
    }

    async fn set_subnets(&self, arn: &str, subnets: &[String]) -> Result<(), AwsError> {
        self.record(format!("SetSubnets {arn} {}", subnets.join(",")));
        Ok(())
    }

    async fn set_security_groups(
        &self,
        arn: &str,
        security_groups: &[String],
    ) -> Result<(), AwsError> {
        self.record(format!("SetSecurityGroups {arn} {}", security_groups.join(",")));
        Ok(())
    }

    async fn modify_load_balancer_attributes(
        &self,
        arn: &str,
        attributes: &Attributes,
    ) -> Result<(), AwsError> {
        self.record(format!("ModifyLoadBalancerAttributes {arn} {attributes:?}"));
        Ok(())
    }

    async fn describe_load_balancers(&self) -> Result<Vec<LoadBalancerState>, AwsError> {
        self.record("DescribeLoadBalancers".to_string());
        Ok(self.load_balancers.lock().expect("lock").clone())
    }
}

#[async_trait]
impl TargetGroupOps for MockAws {
    async fn create_target_group(
        &self,
        name: &str,
        port: i64,
        protocol: &str,
        health_check: &HealthCheck,
    ) -> Result<TargetGroupState, AwsError> {
        self.record(format!("CreateTargetGroup {name}"));
        Ok(TargetGroupState {
            arn: self.next_arn("targetgroup", name),
            name: name.to_string(),
            port,
            protocol: protocol.to_string(),
            health_check: health_check.clone(),
            tags: Tags::new(),
            attributes: Attributes::new(),
            targets: vec![],
        })
    }

    async fn modify_target_group(
        &self,
        arn: &str,
        health_check: &HealthCheck,
    ) -> Result<TargetGroupState, AwsError> {
        self.record(format!("ModifyTargetGroup {arn}"));
        Ok(TargetGroupState {
            arn: arn.to_string(),
            name: "modified".to_string(),
            port: 0,
            protocol: "HTTP".to_string(),
            health_check: health_check.clone(),
            tags: Tags::new(),
            attributes: Attributes::new(),
            targets: vec![],
        })
    }

    async fn delete_target_group(&self, arn: &str) -> Result<(), AwsError> {
        self.record(format!("DeleteTargetGroup {arn}"));
        if self.tg_delete_not_found.load(Ordering::SeqCst) {
            return Err(AwsError::NotFound {
                operation: "DeleteTargetGroup",
                message: format!("{arn} not found"),
            });
        }
        let mut remaining = self.tg_delete_in_use_remaining.lock().expect("lock");
        if *remaining > 0 {
            *remaining = remaining.saturating_sub(1);
            return Err(AwsError::InUse {
                operation: "DeleteTargetGroup",
                message: format!("{arn} is currently in use by a listener or a rule"),
            });
        }
        Ok(())
    }

    async fn register_targets(&self, arn: &str, targets: &[Target]) -> Result<(), AwsError> {
        let ids: Vec<&str> = targets.iter().map(|t| t.id.as_str()).collect();
        self.record(format!("RegisterTargets {arn} {}", ids.join(",")));
        Ok(())
    }

    async fn deregister_targets(&self, arn: &str, targets: &[Target]) -> Result<(), AwsError> {
        let ids: Vec<&str> = targets.iter().map(|t| t.id.as_str()).collect();
        self.record(format!("DeregisterTargets {arn} {}", ids.join(",")));
        Ok(())
    }

    async fn describe_target_health(&self, arn: &str) -> Result<Vec<Target>, AwsError> {
        self.record(format!("DescribeTargetHealth {arn}"));
        Ok(self
            .target_health
            .lock()
            .expect("lock")
            .get(arn)
            .cloned()
            .unwrap_or_default())
    }

    async fn modify_target_group_attributes(
        &self,
        arn: &str,
        attributes: &Attributes,
    ) -> Result<(), AwsError> {
        self.record(format!("ModifyTargetGroupAttributes {arn} {attributes:?}"));
        Ok(())
    }

    async fn describe_target_groups(
        &self,
        lb_arn: &str,
    ) -> Result<Vec<TargetGroupState>, AwsError> {
        self.record(format!("DescribeTargetGroups {lb_arn}"));
        Ok(self
            .target_groups
            .lock()
            .expect("lock")
            .get(lb_arn)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ListenerOps for MockAws {
    async fn create_listener(
        &self,
        lb_arn: &str,
        port: i64,
        protocol: &str,
        certificate_arn: Option<&str>,
        default_target_group_arn: &str,
    ) -> Result<ListenerState, AwsError> {
        self.record(format!("CreateListener {lb_arn} {port} {default_target_group_arn}"));
        Ok(ListenerState {
            arn: self.next_arn("listener", &port.to_string()),
            port,
            protocol: protocol.to_string(),
            certificate_arn: certificate_arn.map(str::to_string),
            default_target_group_arn: default_target_group_arn.to_string(),
        })
    }

    async fn modify_listener(
        &self,
        arn: &str,
        port: i64,
        protocol: &str,
        certificate_arn: Option<&str>,
        default_target_group_arn: &str,
    ) -> Result<ListenerState, AwsError> {
        self.record(format!("ModifyListener {arn} {port} {default_target_group_arn}"));
        Ok(ListenerState {
            arn: arn.to_string(),
            port,
            protocol: protocol.to_string(),
            certificate_arn: certificate_arn.map(str::to_string),
            default_target_group_arn: default_target_group_arn.to_string(),
        })
    }

    async fn delete_listener(&self, arn: &str) -> Result<(), AwsError> {
        self.record(format!("DeleteListener {arn}"));
        if self.listener_delete_not_found.load(Ordering::SeqCst) {
            return Err(AwsError::NotFound {
                operation: "DeleteListener",
                message: format!("{arn} not found"),
            });
        }
        Ok(())
    }

    async fn describe_listeners(&self, lb_arn: &str) -> Result<Vec<ListenerState>, AwsError> {
        self.record(format!("DescribeListeners {lb_arn}"));
        Ok(self
            .listeners
            .lock()
            .expect("lock")
            .get(lb_arn)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl RuleOps for MockAws {
    async fn create_rule(
        &self,
        listener_arn: &str,
        priority: i64,
        conditions: &[RuleCondition],
        target_group_arn: &str,
    ) -> Result<RuleState, AwsError> {
        self.record(format!("CreateRule {listener_arn} {priority} {target_group_arn}"));
        Ok(RuleState {
            arn: self.next_arn("listener-rule", &priority.to_string()),
            priority,
            target_group_arn: target_group_arn.to_string(),
            conditions: conditions.to_vec(),
        })
    }

    async fn modify_rule(
        &self,
        arn: &str,
        conditions: &[RuleCondition],
        target_group_arn: &str,
    ) -> Result<RuleState, AwsError> {
        self.record(format!("ModifyRule {arn} {target_group_arn}"));
        Ok(RuleState {
            arn: arn.to_string(),
            priority: 0,
            target_group_arn: target_group_arn.to_string(),
            conditions: conditions.to_vec(),
        })
    }

    async fn delete_rule(&self, arn: &str) -> Result<(), AwsError> {
        self.record(format!("DeleteRule {arn}"));
        Ok(())
    }

    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<RuleState>, AwsError> {
        self.record(format!("DescribeRules {listener_arn}"));
        Ok(self
            .rules
            .lock()
            .expect("lock")
            .get(listener_arn)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TagOps for MockAws {
    async fn add_tags(&self, arn: &str, tags: &Tags) -> Result<(), AwsError> {
        self.record(format!("AddTags {arn} {tags:?}"));
        Ok(())
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<(), AwsError> {
        self.record(format!("RemoveTags {arn} {}", keys.join(",")));
        Ok(())
    }

    async fn describe_tags(&self, arn: &str) -> Result<Tags, AwsError> {
        self.record(format!("DescribeTags {arn}"));
        Ok(self
            .tags
            .lock()
            .expect("lock")
            .get(arn)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl WafOps for MockAws {
    async fn associate_web_acl(
        &self,
        web_acl_arn: &str,
        resource_arn: &str,
    ) -> Result<(), AwsError> {
        self.record(format!("AssociateWebAcl {web_acl_arn} {resource_arn}"));
        Ok(())
    }

    async fn disassociate_web_acl(&self, resource_arn: &str) -> Result<(), AwsError> {
        self.record(format!("DisassociateWebAcl {resource_arn}"));
        Ok(())
    }

    async fn web_acl_for_resource(&self, resource_arn: &str) -> Result<Option<String>, AwsError> {
        self.record(format!("GetWebAclForResource {resource_arn}"));
        Ok(self.web_acls.lock().expect("lock").get(resource_arn).cloned())
    }
}
