//! # ELBv2 Adapter
//!
//! Thin wrapper over the AWS ELBv2 SDK client implementing the load
//! balancer, target group, listener, rule and tag capability traits.
//! Responsibilities end at type mapping, pagination draining, error
//! classification and per-operation metrics; all convergence decisions
//! live in the reconcilers.

use std::time::Instant;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_elasticloadbalancingv2::error::ProvideErrorMetadata;
use aws_sdk_elasticloadbalancingv2::types as sdk;
use aws_sdk_elasticloadbalancingv2::Client;
use tracing::debug;

use crate::alb::listener::ListenerState;
use crate::alb::loadbalancer::LoadBalancerState;
use crate::alb::rule::{RuleCondition, RuleState};
use crate::alb::targetgroup::TargetGroupState;
use crate::alb::{Attributes, HealthCheck, Tags, Target};
use crate::constants::DEFAULT_RULE_PRIORITY;
use crate::observability::metrics;

use super::{AwsError, ListenerOps, LoadBalancerOps, RuleOps, TagOps, TargetGroupOps};

pub struct Elbv2Adapter {
    client: Client,
    vpc_id: String,
}

impl std::fmt::Debug for Elbv2Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Elbv2Adapter")
            .field("vpc_id", &self.vpc_id)
            .finish_non_exhaustive()
    }
}

impl Elbv2Adapter {
    pub async fn new(region: Option<String>, vpc_id: String) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        debug!("ELBv2 client configured");
        Self {
            client: Client::new(&config),
            vpc_id,
        }
    }
}

/// Map an SDK error onto the [`AwsError`] taxonomy the reconcilers act
/// on. ELBv2 error codes carry `NotFound` / `ResourceInUse` substrings.
fn classify<E>(operation: &'static str, err: E) -> AwsError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    metrics::increment_aws_api_errors(operation);
    let code = err.code().unwrap_or_default().to_string();
    let message = err
        .message()
        .map_or_else(|| err.to_string(), str::to_string);

    if code.contains("NotFound") {
        AwsError::NotFound { operation, message }
    } else if code.contains("ResourceInUse") {
        AwsError::InUse { operation, message }
    } else {
        AwsError::Api {
            operation,
            message: if code.is_empty() {
                message
            } else {
                format!("{code}: {message}")
            },
        }
    }
}

fn invalid_input(operation: &'static str, message: impl std::fmt::Display) -> AwsError {
    AwsError::Api {
        operation,
        message: message.to_string(),
    }
}

fn record(operation: &str, started: Instant) {
    metrics::record_aws_api_call(operation, started.elapsed().as_secs_f64());
}

fn to_i32(operation: &'static str, value: i64) -> Result<i32, AwsError> {
    i32::try_from(value).map_err(|e| invalid_input(operation, e))
}

fn sdk_tags(tags: &Tags) -> Vec<sdk::Tag> {
    tags.iter()
        .map(|(key, value)| sdk::Tag::builder().key(key).value(value).build())
        .collect()
}

fn sdk_targets(
    operation: &'static str,
    targets: &[Target],
) -> Result<Vec<sdk::TargetDescription>, AwsError> {
    targets
        .iter()
        .map(|target| {
            Ok(sdk::TargetDescription::builder()
                .id(&target.id)
                .port(to_i32(operation, target.port)?)
                .build())
        })
        .collect()
}

fn forward_action(target_group_arn: &str) -> sdk::Action {
    sdk::Action::builder()
        .r#type(sdk::ActionTypeEnum::Forward)
        .target_group_arn(target_group_arn)
        .build()
}

fn sdk_conditions(conditions: &[RuleCondition]) -> Vec<sdk::RuleCondition> {
    conditions
        .iter()
        .map(|condition| {
            sdk::RuleCondition::builder()
                .field(&condition.field)
                .set_values(Some(condition.values.clone()))
                .build()
        })
        .collect()
}

fn lb_state(lb: &sdk::LoadBalancer) -> LoadBalancerState {
    LoadBalancerState {
        arn: lb.load_balancer_arn().unwrap_or_default().to_string(),
        name: lb.load_balancer_name().unwrap_or_default().to_string(),
        dns_name: lb.dns_name().unwrap_or_default().to_string(),
        scheme: lb
            .scheme()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        subnets: lb
            .availability_zones()
            .iter()
            .filter_map(|az| az.subnet_id())
            .map(str::to_string)
            .collect(),
        security_groups: lb.security_groups().to_vec(),
        tags: Tags::new(),
        attributes: Attributes::new(),
        web_acl_arn: None,
    }
}

fn tg_state(tg: &sdk::TargetGroup) -> TargetGroupState {
    TargetGroupState {
        arn: tg.target_group_arn().unwrap_or_default().to_string(),
        name: tg.target_group_name().unwrap_or_default().to_string(),
        port: i64::from(tg.port().unwrap_or_default()),
        protocol: tg
            .protocol()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default(),
        health_check: HealthCheck {
            path: tg.health_check_path().unwrap_or("/").to_string(),
            port: tg.health_check_port().unwrap_or("traffic-port").to_string(),
            protocol: tg
                .health_check_protocol()
                .map_or_else(|| "HTTP".to_string(), |p| p.as_str().to_string()),
            interval_seconds: tg.health_check_interval_seconds().unwrap_or_default(),
            timeout_seconds: tg.health_check_timeout_seconds().unwrap_or_default(),
            healthy_threshold: tg.healthy_threshold_count().unwrap_or_default(),
            unhealthy_threshold: tg.unhealthy_threshold_count().unwrap_or_default(),
        },
        tags: Tags::new(),
        attributes: Attributes::new(),
        targets: vec![],
    }
}

fn listener_state(listener: &sdk::Listener) -> ListenerState {
    ListenerState {
        arn: listener.listener_arn().unwrap_or_default().to_string(),
        port: i64::from(listener.port().unwrap_or_default()),
        protocol: listener
            .protocol()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default(),
        certificate_arn: listener
            .certificates()
            .first()
            .and_then(|c| c.certificate_arn())
            .map(str::to_string),
        default_target_group_arn: listener
            .default_actions()
            .first()
            .and_then(|a| a.target_group_arn())
            .map(str::to_string)
            .unwrap_or_default(),
    }
}

/// The rule API renders the default-action sentinel as the string
/// `"default"`; everything else is a numeric priority.
fn rule_state(rule: &sdk::Rule) -> RuleState {
    let priority = match rule.priority() {
        Some("default") | None => DEFAULT_RULE_PRIORITY,
        Some(p) => p.parse().unwrap_or(DEFAULT_RULE_PRIORITY),
    };
    RuleState {
        arn: rule.rule_arn().unwrap_or_default().to_string(),
        priority,
        target_group_arn: rule
            .actions()
            .first()
            .and_then(|a| a.target_group_arn())
            .map(str::to_string)
            .unwrap_or_default(),
        conditions: rule
            .conditions()
            .iter()
            .map(|c| RuleCondition {
                field: c.field().unwrap_or_default().to_string(),
                values: c.values().to_vec(),
            })
            .collect(),
    }
}

#[async_trait]
impl LoadBalancerOps for Elbv2Adapter {
    async fn create_load_balancer(
        &self,
        name: &str,
        scheme: &str,
        subnets: &[String],
        security_groups: &[String],
    ) -> Result<LoadBalancerState, AwsError> {
        const OP: &str = "CreateLoadBalancer";
        let started = Instant::now();
        let output = self
            .client
            .create_load_balancer()
            .name(name)
            .r#type(sdk::LoadBalancerTypeEnum::Application)
            .scheme(sdk::LoadBalancerSchemeEnum::from(scheme))
            .set_subnets(Some(subnets.to_vec()))
            .set_security_groups(Some(security_groups.to_vec()))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);

        output
            .load_balancers()
            .first()
            .map(lb_state)
            .ok_or_else(|| invalid_input(OP, "response contained no load balancer"))
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<(), AwsError> {
        const OP: &str = "DeleteLoadBalancer";
        let started = Instant::now();
        self.client
            .delete_load_balancer()
            .load_balancer_arn(arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn set_subnets(&self, arn: &str, subnets: &[String]) -> Result<(), AwsError> {
        const OP: &str = "SetSubnets";
        let started = Instant::now();
        self.client
            .set_subnets()
            .load_balancer_arn(arn)
            .set_subnets(Some(subnets.to_vec()))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn set_security_groups(
        &self,
        arn: &str,
        security_groups: &[String],
    ) -> Result<(), AwsError> {
        const OP: &str = "SetSecurityGroups";
        let started = Instant::now();
        self.client
            .set_security_groups()
            .load_balancer_arn(arn)
            .set_security_groups(Some(security_groups.to_vec()))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn modify_load_balancer_attributes(
        &self,
        arn: &str,
        attributes: &Attributes,
    ) -> Result<(), AwsError> {
        const OP: &str = "ModifyLoadBalancerAttributes";
        let sdk_attributes: Vec<sdk::LoadBalancerAttribute> = attributes
            .iter()
            .map(|(key, value)| {
                sdk::LoadBalancerAttribute::builder()
                    .key(key)
                    .value(value)
                    .build()
            })
            .collect();

        let started = Instant::now();
        self.client
            .modify_load_balancer_attributes()
            .load_balancer_arn(arn)
            .set_attributes(Some(sdk_attributes))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn describe_load_balancers(&self) -> Result<Vec<LoadBalancerState>, AwsError> {
        const OP: &str = "DescribeLoadBalancers";
        let started = Instant::now();
        let pages = self
            .client
            .describe_load_balancers()
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(pages.iter().map(lb_state).collect())
    }
}

#[async_trait]
impl TargetGroupOps for Elbv2Adapter {
    async fn create_target_group(
        &self,
        name: &str,
        port: i64,
        protocol: &str,
        health_check: &HealthCheck,
    ) -> Result<TargetGroupState, AwsError> {
        const OP: &str = "CreateTargetGroup";
        let started = Instant::now();
        let output = self
            .client
            .create_target_group()
            .name(name)
            .vpc_id(&self.vpc_id)
            .port(to_i32(OP, port)?)
            .protocol(sdk::ProtocolEnum::from(protocol))
            .target_type(sdk::TargetTypeEnum::Instance)
            .health_check_path(&health_check.path)
            .health_check_port(&health_check.port)
            .health_check_protocol(sdk::ProtocolEnum::from(health_check.protocol.as_str()))
            .health_check_interval_seconds(health_check.interval_seconds)
            .health_check_timeout_seconds(health_check.timeout_seconds)
            .healthy_threshold_count(health_check.healthy_threshold)
            .unhealthy_threshold_count(health_check.unhealthy_threshold)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);

        output
            .target_groups()
            .first()
            .map(tg_state)
            .ok_or_else(|| invalid_input(OP, "response contained no target group"))
    }

    async fn modify_target_group(
        &self,
        arn: &str,
        health_check: &HealthCheck,
    ) -> Result<TargetGroupState, AwsError> {
        const OP: &str = "ModifyTargetGroup";
        let started = Instant::now();
        let output = self
            .client
            .modify_target_group()
            .target_group_arn(arn)
            .health_check_path(&health_check.path)
            .health_check_port(&health_check.port)
            .health_check_protocol(sdk::ProtocolEnum::from(health_check.protocol.as_str()))
            .health_check_interval_seconds(health_check.interval_seconds)
            .health_check_timeout_seconds(health_check.timeout_seconds)
            .healthy_threshold_count(health_check.healthy_threshold)
            .unhealthy_threshold_count(health_check.unhealthy_threshold)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);

        output
            .target_groups()
            .first()
            .map(tg_state)
            .ok_or_else(|| invalid_input(OP, "response contained no target group"))
    }

    async fn delete_target_group(&self, arn: &str) -> Result<(), AwsError> {
        const OP: &str = "DeleteTargetGroup";
        let started = Instant::now();
        self.client
            .delete_target_group()
            .target_group_arn(arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn register_targets(&self, arn: &str, targets: &[Target]) -> Result<(), AwsError> {
        const OP: &str = "RegisterTargets";
        let started = Instant::now();
        self.client
            .register_targets()
            .target_group_arn(arn)
            .set_targets(Some(sdk_targets(OP, targets)?))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn deregister_targets(&self, arn: &str, targets: &[Target]) -> Result<(), AwsError> {
        const OP: &str = "DeregisterTargets";
        let started = Instant::now();
        self.client
            .deregister_targets()
            .target_group_arn(arn)
            .set_targets(Some(sdk_targets(OP, targets)?))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn describe_target_health(&self, arn: &str) -> Result<Vec<Target>, AwsError> {
        const OP: &str = "DescribeTargetHealth";
        let started = Instant::now();
        let output = self
            .client
            .describe_target_health()
            .target_group_arn(arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);

        Ok(output
            .target_health_descriptions()
            .iter()
            .filter_map(|description| {
                let target = description.target()?;
                Some(Target {
                    id: target.id()?.to_string(),
                    port: i64::from(target.port().unwrap_or_default()),
                })
            })
            .collect())
    }

    async fn modify_target_group_attributes(
        &self,
        arn: &str,
        attributes: &Attributes,
    ) -> Result<(), AwsError> {
        const OP: &str = "ModifyTargetGroupAttributes";
        let sdk_attributes: Vec<sdk::TargetGroupAttribute> = attributes
            .iter()
            .map(|(key, value)| {
                sdk::TargetGroupAttribute::builder()
                    .key(key)
                    .value(value)
                    .build()
            })
            .collect();

        let started = Instant::now();
        self.client
            .modify_target_group_attributes()
            .target_group_arn(arn)
            .set_attributes(Some(sdk_attributes))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn describe_target_groups(
        &self,
        lb_arn: &str,
    ) -> Result<Vec<TargetGroupState>, AwsError> {
        const OP: &str = "DescribeTargetGroups";
        let started = Instant::now();
        let pages = self
            .client
            .describe_target_groups()
            .load_balancer_arn(lb_arn)
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(pages.iter().map(tg_state).collect())
    }
}

#[async_trait]
impl ListenerOps for Elbv2Adapter {
    async fn create_listener(
        &self,
        lb_arn: &str,
        port: i64,
        protocol: &str,
        certificate_arn: Option<&str>,
        default_target_group_arn: &str,
    ) -> Result<ListenerState, AwsError> {
        const OP: &str = "CreateListener";
        let mut request = self
            .client
            .create_listener()
            .load_balancer_arn(lb_arn)
            .port(to_i32(OP, port)?)
            .protocol(sdk::ProtocolEnum::from(protocol))
            .default_actions(forward_action(default_target_group_arn));
        if let Some(arn) = certificate_arn {
            request = request.certificates(
                sdk::Certificate::builder().certificate_arn(arn).build(),
            );
        }

        let started = Instant::now();
        let output = request.send().await.map_err(|e| classify(OP, e))?;
        record(OP, started);

        output
            .listeners()
            .first()
            .map(listener_state)
            .ok_or_else(|| invalid_input(OP, "response contained no listener"))
    }

    async fn modify_listener(
        &self,
        arn: &str,
        port: i64,
        protocol: &str,
        certificate_arn: Option<&str>,
        default_target_group_arn: &str,
    ) -> Result<ListenerState, AwsError> {
        const OP: &str = "ModifyListener";
        let mut request = self
            .client
            .modify_listener()
            .listener_arn(arn)
            .port(to_i32(OP, port)?)
            .protocol(sdk::ProtocolEnum::from(protocol))
            .default_actions(forward_action(default_target_group_arn));
        if let Some(cert) = certificate_arn {
            request = request.certificates(
                sdk::Certificate::builder().certificate_arn(cert).build(),
            );
        }

        let started = Instant::now();
        let output = request.send().await.map_err(|e| classify(OP, e))?;
        record(OP, started);

        output
            .listeners()
            .first()
            .map(listener_state)
            .ok_or_else(|| invalid_input(OP, "response contained no listener"))
    }

    async fn delete_listener(&self, arn: &str) -> Result<(), AwsError> {
        const OP: &str = "DeleteListener";
        let started = Instant::now();
        self.client
            .delete_listener()
            .listener_arn(arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn describe_listeners(&self, lb_arn: &str) -> Result<Vec<ListenerState>, AwsError> {
        const OP: &str = "DescribeListeners";
        let started = Instant::now();
        let pages = self
            .client
            .describe_listeners()
            .load_balancer_arn(lb_arn)
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(pages.iter().map(listener_state).collect())
    }
}

#[async_trait]
impl RuleOps for Elbv2Adapter {
    async fn create_rule(
        &self,
        listener_arn: &str,
        priority: i64,
        conditions: &[RuleCondition],
        target_group_arn: &str,
    ) -> Result<RuleState, AwsError> {
        const OP: &str = "CreateRule";
        let started = Instant::now();
        let output = self
            .client
            .create_rule()
            .listener_arn(listener_arn)
            .priority(to_i32(OP, priority)?)
            .set_conditions(Some(sdk_conditions(conditions)))
            .actions(forward_action(target_group_arn))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);

        output
            .rules()
            .first()
            .map(rule_state)
            .ok_or_else(|| invalid_input(OP, "response contained no rule"))
    }

    async fn modify_rule(
        &self,
        arn: &str,
        conditions: &[RuleCondition],
        target_group_arn: &str,
    ) -> Result<RuleState, AwsError> {
        const OP: &str = "ModifyRule";
        let started = Instant::now();
        let output = self
            .client
            .modify_rule()
            .rule_arn(arn)
            .set_conditions(Some(sdk_conditions(conditions)))
            .actions(forward_action(target_group_arn))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);

        output
            .rules()
            .first()
            .map(rule_state)
            .ok_or_else(|| invalid_input(OP, "response contained no rule"))
    }

    async fn delete_rule(&self, arn: &str) -> Result<(), AwsError> {
        const OP: &str = "DeleteRule";
        let started = Instant::now();
        self.client
            .delete_rule()
            .rule_arn(arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<RuleState>, AwsError> {
        const OP: &str = "DescribeRules";
        // No generated paginator for this operation; drain the marker
        // manually
        let started = Instant::now();
        let mut states = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut request = self.client.describe_rules().listener_arn(listener_arn);
            if let Some(m) = &marker {
                request = request.marker(m);
            }
            let output = request.send().await.map_err(|e| classify(OP, e))?;
            states.extend(output.rules().iter().map(rule_state));
            match output.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }
        record(OP, started);
        Ok(states)
    }
}

#[async_trait]
impl TagOps for Elbv2Adapter {
    async fn add_tags(&self, arn: &str, tags: &Tags) -> Result<(), AwsError> {
        const OP: &str = "AddTags";
        let started = Instant::now();
        self.client
            .add_tags()
            .resource_arns(arn)
            .set_tags(Some(sdk_tags(tags)))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<(), AwsError> {
        const OP: &str = "RemoveTags";
        let started = Instant::now();
        self.client
            .remove_tags()
            .resource_arns(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn describe_tags(&self, arn: &str) -> Result<Tags, AwsError> {
        const OP: &str = "DescribeTags";
        let started = Instant::now();
        let output = self
            .client
            .describe_tags()
            .resource_arns(arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);

        Ok(output
            .tag_descriptions()
            .first()
            .map(|description| {
                description
                    .tags()
                    .iter()
                    .filter_map(|tag| {
                        Some((tag.key()?.to_string(), tag.value().unwrap_or_default().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
