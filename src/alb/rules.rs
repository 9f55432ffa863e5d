//! # Rules Collection Reconciler
//!
//! Ordered reconciliation of all rules owned by one listener. The first
//! member error aborts the pass (changes already applied to earlier
//! members stay applied - at-least-once, not atomic); a successful pass
//! filters out members whose cloud counterpart was removed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::rule::Rule;
use super::targetgroups::TargetGroups;
use super::{ReconcileCtx, ReconcileError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rules(pub Vec<Rule>);

impl Rules {
    /// Reconcile every rule in stored order against the owning listener.
    /// Must run after the listener itself holds a current ARN.
    pub async fn reconcile(
        &mut self,
        ctx: &ReconcileCtx,
        listener_arn: &str,
        target_groups: &TargetGroups,
    ) -> Result<(), ReconcileError> {
        for rule in &mut self.0 {
            rule.reconcile(ctx, listener_arn, target_groups).await?;
        }
        self.0.retain(|rule| !rule.deleted);
        Ok(())
    }

    /// Target group ARNs some rule currently forwards to
    pub fn referenced_target_group_arns(&self) -> BTreeSet<String> {
        self.0
            .iter()
            .filter_map(|rule| rule.current.as_ref())
            .map(|current| current.target_group_arn.clone())
            .collect()
    }

    /// Backing (service, port) pairs the desired side still references
    pub fn referenced_services(&self) -> BTreeSet<(String, i64)> {
        self.0
            .iter()
            .filter_map(|rule| rule.desired.as_ref())
            .map(|desired| (desired.service_name.clone(), desired.service_port))
            .collect()
    }

    /// Locate a rule by its priority identity
    pub fn find_mut(&mut self, priority: i64) -> Option<&mut Rule> {
        self.0.iter_mut().find(|r| r.priority() == Some(priority))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alb::rule::{RuleSpec, RuleState};
    use crate::aws::mock::MockAws;
    use crate::k8s::test_support::RecordingEvents;

    fn deletable(priority: i64) -> Rule {
        Rule {
            desired: None,
            current: Some(RuleState {
                arn: format!("arn:rule/{priority}"),
                priority,
                target_group_arn: "arn:tg".to_string(),
                conditions: vec![],
            }),
            deleted: false,
        }
    }

    fn reconciled(priority: i64) -> Rule {
        let conditions = vec![];
        Rule {
            desired: Some(RuleSpec {
                priority,
                service_name: "default/api".to_string(),
                service_port: 80,
                conditions: conditions.clone(),
            }),
            current: Some(RuleState {
                arn: format!("arn:rule/{priority}"),
                priority,
                target_group_arn: "arn:tg".to_string(),
                conditions,
            }),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn test_deleted_members_filtered_preserving_order() {
        let mock = Arc::new(MockAws::default());
        let ctx = ReconcileCtx {
            aws: mock.services(),
            events: Arc::new(RecordingEvents::default()),
        };
        let mut tgs = TargetGroups::default();
        tgs.set_resolution("default/api", 80, "arn:tg");

        let mut rules = Rules(vec![reconciled(1), deletable(2), reconciled(3)]);
        rules
            .reconcile(&ctx, "arn:listener", &tgs)
            .await
            .expect("reconcile should succeed");

        let priorities: Vec<i64> = rules.0.iter().filter_map(Rule::priority).collect();
        assert_eq!(priorities, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_first_error_aborts_collection() {
        let mock = Arc::new(MockAws::default());
        let ctx = ReconcileCtx {
            aws: mock.services(),
            events: Arc::new(RecordingEvents::default()),
        };

        // Rule 1 wants creation but its service cannot resolve; rule 2
        // would be a delete. The delete must never run.
        let mut rules = Rules(vec![
            Rule::new(RuleSpec {
                priority: 1,
                service_name: "default/missing".to_string(),
                service_port: 80,
                conditions: vec![],
            }),
            deletable(2),
        ]);

        let err = rules
            .reconcile(&ctx, "arn:listener", &TargetGroups::default())
            .await
            .expect_err("first rule must fail");
        assert!(matches!(err, ReconcileError::MissingTargetGroupArn(_)));
        assert!(mock.calls().is_empty(), "later members must not reconcile");
        assert_eq!(rules.0.len(), 2, "no filtering on an aborted pass");
    }
}
