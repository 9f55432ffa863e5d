//! # State Assembly
//!
//! Rebuilds current-only resource trees from the cloud at startup, so a
//! restarted controller adopts what a previous incarnation created
//! instead of recreating it. Ownership is recovered from the cluster
//! name prefix on the load balancer name plus the identity tags written
//! at creation time.

use anyhow::Context;
use tracing::{info, warn};

use crate::aws::AwsServices;
use crate::constants::{TAG_INGRESS_NAME, TAG_NAMESPACE, TAG_SERVICE_NAME, TAG_SERVICE_PORT};

use super::id;
use super::listener::Listener;
use super::listeners::Listeners;
use super::loadbalancer::LoadBalancer;
use super::rule::Rule;
use super::rules::Rules;
use super::targetgroup::TargetGroup;
use super::targetgroups::TargetGroups;

/// One adopted load balancer and the ingress identity recovered from its
/// tags
#[derive(Debug)]
pub struct AssembledIngress {
    pub namespace: String,
    pub name: String,
    pub load_balancer: LoadBalancer,
}

/// Discover every load balancer this controller owns in the account and
/// rebuild its full tree (target groups with live target membership,
/// listeners with their rules, the WAF association). The resulting trees
/// carry current state only; desired state arrives with the first watch
/// or sync event.
pub async fn assemble(aws: &AwsServices, cluster: &str) -> anyhow::Result<Vec<AssembledIngress>> {
    let prefix = id::cluster_prefix(cluster);
    let all = aws
        .lb
        .describe_load_balancers()
        .await
        .context("describing load balancers")?;

    let mut assembled = Vec::new();
    for mut state in all {
        if !state.name.starts_with(&prefix) {
            continue;
        }

        let tags = aws
            .tag
            .describe_tags(&state.arn)
            .await
            .with_context(|| format!("describing tags of {}", state.name))?;
        let (Some(namespace), Some(name)) =
            (tags.get(TAG_NAMESPACE).cloned(), tags.get(TAG_INGRESS_NAME).cloned())
        else {
            warn!(
                load_balancer = %state.name,
                "Skipping load balancer without ownership tags"
            );
            continue;
        };

        let target_groups = assemble_target_groups(aws, &state.arn).await?;
        let listeners = assemble_listeners(aws, &state.arn).await?;
        state.web_acl_arn = aws
            .waf
            .web_acl_for_resource(&state.arn)
            .await
            .with_context(|| format!("looking up web ACL of {}", state.name))?;
        state.tags = tags;

        info!(
            load_balancer = %state.name,
            ingress = %format!("{namespace}/{name}"),
            target_groups = target_groups.0.len(),
            listeners = listeners.0.len(),
            "Adopted load balancer"
        );

        assembled.push(AssembledIngress {
            namespace,
            name,
            load_balancer: LoadBalancer {
                id: state.name.clone(),
                desired: None,
                current: Some(state),
                target_groups,
                listeners,
                deleted: false,
            },
        });
    }

    Ok(assembled)
}

async fn assemble_target_groups(
    aws: &AwsServices,
    lb_arn: &str,
) -> anyhow::Result<TargetGroups> {
    let states = aws
        .tg
        .describe_target_groups(lb_arn)
        .await
        .context("describing target groups")?;

    let mut groups = Vec::with_capacity(states.len());
    for mut state in states {
        state.tags = aws
            .tag
            .describe_tags(&state.arn)
            .await
            .with_context(|| format!("describing tags of {}", state.name))?;
        state.targets = aws
            .tg
            .describe_target_health(&state.arn)
            .await
            .with_context(|| format!("describing target health of {}", state.name))?;

        let service_name = state.tags.get(TAG_SERVICE_NAME).cloned().unwrap_or_default();
        let service_port = state
            .tags
            .get(TAG_SERVICE_PORT)
            .and_then(|p| p.parse().ok())
            .unwrap_or_default();
        if service_name.is_empty() {
            warn!(
                target_group = %state.name,
                "Target group has no service tag; it will be pruned unless a rule references it"
            );
        }

        groups.push(TargetGroup {
            id: state.name.clone(),
            service_name,
            service_port,
            desired: None,
            current: Some(state),
            deleted: false,
        });
    }
    Ok(TargetGroups(groups))
}

async fn assemble_listeners(aws: &AwsServices, lb_arn: &str) -> anyhow::Result<Listeners> {
    let states = aws
        .listener
        .describe_listeners(lb_arn)
        .await
        .context("describing listeners")?;

    let mut listeners = Vec::with_capacity(states.len());
    for state in states {
        let rule_states = aws
            .rule
            .describe_rules(&state.arn)
            .await
            .with_context(|| format!("describing rules of listener {}", state.port))?;
        let rules = rule_states
            .into_iter()
            .map(|current| Rule {
                desired: None,
                current: Some(current),
                deleted: false,
            })
            .collect();

        listeners.push(Listener {
            desired: None,
            current: Some(state),
            rules: Rules(rules),
            deleted: false,
        });
    }
    Ok(Listeners(listeners))
}
