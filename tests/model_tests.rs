//! # Resource Model Unit Tests
//!
//! Tests for the public model surface exercised through the library crate.
//!
//! These tests verify:
//! - Deterministic resource naming across process restarts
//! - AWS name length and character-set limits
//! - Annotation parsing including strict failure on malformed input
//! - Plan selection precedence for the shared Desired/Current state machine
//! - Tag/attribute diffing

use std::collections::BTreeMap;

use alb_ingress_controller::alb::plan::{plan, Plan};
use alb_ingress_controller::alb::tags::{diff, TagDiff};
use alb_ingress_controller::alb::{id, Tags};
use alb_ingress_controller::annotations::IngressAnnotations;
use alb_ingress_controller::constants::{ANNOTATION_PREFIX, AWS_RESOURCE_NAME_MAX_LEN};

fn annotation(suffix: &str, value: &str) -> (String, String) {
    (format!("{ANNOTATION_PREFIX}/{suffix}"), value.to_string())
}

fn minimal_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([
        annotation("scheme", "internal"),
        annotation("subnets", "subnet-1,subnet-2"),
    ])
}

#[test]
fn test_resource_names_are_stable_across_processes() {
    // The names are pure functions of identity fields; nothing about the
    // process (hasher seeds, iteration order) may leak in
    assert_eq!(
        id::load_balancer_name("prod", "default", "web"),
        id::load_balancer_name("prod", "default", "web"),
    );
    assert_eq!(
        id::target_group_name("prod", "default/api", 30080, "HTTP"),
        id::target_group_name("prod", "default/api", 30080, "HTTP"),
    );
}

#[test]
fn test_resource_names_respect_aws_limits() {
    let cases = vec![
        id::load_balancer_name("prod", "default", "web"),
        id::load_balancer_name(
            "an-extremely-long-cluster-name-nobody-should-use",
            "some-namespace",
            "some-ingress",
        ),
        id::target_group_name("prod", "default/api", 30080, "HTTP"),
    ];
    for name in cases {
        assert!(
            name.len() <= AWS_RESOURCE_NAME_MAX_LEN,
            "name '{}' exceeds {} characters",
            name,
            AWS_RESOURCE_NAME_MAX_LEN
        );
        assert!(
            name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "name '{}' contains characters AWS rejects",
            name
        );
    }
}

#[test]
fn test_node_port_change_renames_target_group() {
    // A new node port must map to a new target group so the old one can
    // be created alongside and the stale one pruned afterwards
    let before = id::target_group_name("prod", "default/api", 30080, "HTTP");
    let after = id::target_group_name("prod", "default/api", 30081, "HTTP");
    assert_ne!(before, after);
}

#[test]
fn test_cluster_prefix_selects_own_resources_only() {
    let own = id::load_balancer_name("prod", "default", "web");
    let foreign = id::load_balancer_name("prod-eu", "default", "web");
    let prefix = id::cluster_prefix("prod");
    assert!(own.starts_with(&prefix));
    assert!(!foreign.starts_with(&prefix));
}

#[test]
fn test_annotations_parse_full_set() {
    let mut annotations = minimal_annotations();
    annotations.extend([
        annotation("security-groups", "sg-1"),
        annotation("listen-ports", r#"[{"HTTP": 80}, {"HTTPS": 443}]"#),
        annotation("certificate-arn", "arn:aws:acm:cert/1"),
        annotation("healthcheck-path", "/healthz"),
        annotation("healthcheck-interval-seconds", "30"),
        annotation("tags", "Team=platform,CostCenter=42"),
        annotation("waf-acl-arn", "arn:aws:wafv2:acl/1"),
        annotation("idle-timeout-seconds", "120"),
    ]);

    let parsed = IngressAnnotations::parse(&annotations).expect("parse");
    assert_eq!(parsed.scheme, "internal");
    assert_eq!(parsed.subnets, vec!["subnet-1", "subnet-2"]);
    assert_eq!(parsed.security_groups, vec!["sg-1"]);
    assert_eq!(parsed.listen_ports.len(), 2);
    assert_eq!(parsed.healthcheck_path.as_deref(), Some("/healthz"));
    assert_eq!(parsed.healthcheck_interval_seconds, Some(30));
    assert_eq!(parsed.tags.get("Team").map(String::as_str), Some("platform"));
    assert_eq!(parsed.web_acl_arn.as_deref(), Some("arn:aws:wafv2:acl/1"));
    assert_eq!(parsed.idle_timeout_seconds, Some(120));
}

#[test]
fn test_annotations_fail_closed() {
    // A malformed annotation must fail the whole ingress instead of
    // silently provisioning with defaults
    let failing_cases = vec![
        ("scheme", "public"),
        ("subnets", ""),
        ("listen-ports", "80,443"),
        ("listen-ports", r#"[{"TCP": 80}]"#),
        ("listen-ports", r#"[{"HTTP": 99999}]"#),
        ("tags", "NotAPair"),
        ("idle-timeout-seconds", "two-minutes"),
    ];

    for (suffix, value) in failing_cases {
        let mut annotations = minimal_annotations();
        annotations.extend([annotation(suffix, value)]);
        assert!(
            IngressAnnotations::parse(&annotations).is_err(),
            "annotation {}={:?} should be rejected",
            suffix,
            value
        );
    }
}

#[test]
fn test_plan_precedence() {
    let comparator = |d: &i32, c: &i32| d != c;
    assert_eq!(plan::<i32, i32, _>(None, None, comparator), Plan::NoOp);
    assert_eq!(plan(None, Some(&1), comparator), Plan::Delete);
    assert_eq!(plan(Some(&1), None, comparator), Plan::Create);
    assert_eq!(plan(Some(&1), Some(&2), comparator), Plan::Modify);
    assert_eq!(plan(Some(&1), Some(&1), comparator), Plan::NoOp);
}

#[test]
fn test_tag_diff_minimal_change_set() {
    let desired: Tags = BTreeMap::from([
        ("keep".to_string(), "same".to_string()),
        ("update".to_string(), "v2".to_string()),
        ("add".to_string(), "x".to_string()),
    ]);
    let current: Tags = BTreeMap::from([
        ("keep".to_string(), "same".to_string()),
        ("update".to_string(), "v1".to_string()),
        ("drop".to_string(), "y".to_string()),
    ]);

    let result = diff(&desired, &current);
    assert_eq!(result.to_upsert.len(), 2);
    assert_eq!(result.to_upsert.get("add").map(String::as_str), Some("x"));
    assert_eq!(result.to_upsert.get("update").map(String::as_str), Some("v2"));
    assert_eq!(result.to_remove.len(), 1);
    assert!(result.to_remove.contains_key("drop"));
}

#[test]
fn test_tag_diff_equal_maps_is_empty() {
    let tags: Tags = BTreeMap::from([("a".to_string(), "1".to_string())]);
    assert_eq!(diff(&tags, &tags), TagDiff::default());
}
