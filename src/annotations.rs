//! # Ingress Annotations
//!
//! Typed view over the `alb.ingress.kubernetes.io/*` annotations that
//! drive load balancer provisioning. Parsing is strict: a malformed
//! annotation fails the whole ingress rather than silently falling back,
//! so a typo never provisions an internet-facing load balancer that was
//! meant to be internal.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::alb::Tags;
use crate::constants::ANNOTATION_PREFIX;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("missing required annotation {0}/{1}")]
    Missing(&'static str, &'static str),

    #[error("annotation {key}: invalid value {value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// One listener port mapping, e.g. `{"HTTPS": 443}` in the listen-ports
/// annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenPort {
    pub protocol: String,
    pub port: i64,
}

/// Everything the controller reads off an ingress object's annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressAnnotations {
    /// `internet-facing` or `internal`
    pub scheme: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub certificate_arn: Option<String>,
    pub listen_ports: Vec<ListenPort>,
    pub backend_protocol: String,
    pub healthcheck_path: Option<String>,
    pub healthcheck_interval_seconds: Option<i32>,
    pub tags: Tags,
    pub web_acl_arn: Option<String>,
    pub idle_timeout_seconds: Option<u32>,
}

impl IngressAnnotations {
    /// Parse the annotation map of one ingress object. `scheme` and
    /// `subnets` are required; everything else has a default or is
    /// optional.
    pub fn parse(annotations: &BTreeMap<String, String>) -> Result<Self, AnnotationError> {
        let get = |suffix: &str| annotations.get(&format!("{ANNOTATION_PREFIX}/{suffix}"));

        let scheme = get("scheme")
            .ok_or(AnnotationError::Missing(ANNOTATION_PREFIX, "scheme"))?
            .clone();
        if scheme != "internet-facing" && scheme != "internal" {
            return Err(invalid(
                "scheme",
                &scheme,
                "must be \"internet-facing\" or \"internal\"",
            ));
        }

        let subnets = csv(
            get("subnets").ok_or(AnnotationError::Missing(ANNOTATION_PREFIX, "subnets"))?,
        );
        if subnets.is_empty() {
            return Err(invalid("subnets", "", "at least one subnet is required"));
        }

        let security_groups = get("security-groups").map(|v| csv(v)).unwrap_or_default();
        let certificate_arn = get("certificate-arn").cloned();

        let listen_ports = match get("listen-ports") {
            Some(raw) => parse_listen_ports(raw)?,
            None => vec![ListenPort {
                protocol: "HTTP".to_string(),
                port: 80,
            }],
        };

        let backend_protocol = get("backend-protocol")
            .cloned()
            .unwrap_or_else(|| "HTTP".to_string());

        let healthcheck_path = get("healthcheck-path").cloned();
        let healthcheck_interval_seconds = get("healthcheck-interval-seconds")
            .map(|v| parse_number("healthcheck-interval-seconds", v))
            .transpose()?;

        let tags = match get("tags") {
            Some(raw) => parse_tags(raw)?,
            None => Tags::new(),
        };

        let web_acl_arn = get("waf-acl-arn").cloned();
        let idle_timeout_seconds = get("idle-timeout-seconds")
            .map(|v| parse_number("idle-timeout-seconds", v))
            .transpose()?;

        Ok(Self {
            scheme,
            subnets,
            security_groups,
            certificate_arn,
            listen_ports,
            backend_protocol,
            healthcheck_path,
            healthcheck_interval_seconds,
            tags,
            web_acl_arn,
            idle_timeout_seconds,
        })
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> AnnotationError {
    AnnotationError::Invalid {
        key: format!("{ANNOTATION_PREFIX}/{key}"),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, AnnotationError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, raw, "not a valid number"))
}

/// The listen-ports annotation is a JSON array of single-entry maps:
/// `[{"HTTP": 80}, {"HTTPS": 443}]`
fn parse_listen_ports(raw: &str) -> Result<Vec<ListenPort>, AnnotationError> {
    let entries: Vec<BTreeMap<String, i64>> = serde_json::from_str(raw)
        .map_err(|e| invalid("listen-ports", raw, &e.to_string()))?;

    let mut ports = Vec::new();
    for entry in entries {
        for (protocol, port) in entry {
            if protocol != "HTTP" && protocol != "HTTPS" {
                return Err(invalid("listen-ports", raw, "protocol must be HTTP or HTTPS"));
            }
            if !(1..=65535).contains(&port) {
                return Err(invalid("listen-ports", raw, "port out of range"));
            }
            ports.push(ListenPort {
                protocol,
                port,
            });
        }
    }
    if ports.is_empty() {
        return Err(invalid("listen-ports", raw, "no ports listed"));
    }
    Ok(ports)
}

/// Comma-separated `Key=Value` pairs
fn parse_tags(raw: &str) -> Result<Tags, AnnotationError> {
    let mut tags = Tags::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(invalid("tags", raw, "expected Key=Value pairs"));
        };
        tags.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                format!("{ANNOTATION_PREFIX}/scheme"),
                "internet-facing".to_string(),
            ),
            (
                format!("{ANNOTATION_PREFIX}/subnets"),
                "subnet-a, subnet-b".to_string(),
            ),
        ])
    }

    #[test]
    fn test_minimal_annotations() {
        let parsed = IngressAnnotations::parse(&base()).expect("parse");
        assert_eq!(parsed.scheme, "internet-facing");
        assert_eq!(parsed.subnets, vec!["subnet-a", "subnet-b"]);
        assert_eq!(
            parsed.listen_ports,
            vec![ListenPort {
                protocol: "HTTP".to_string(),
                port: 80
            }]
        );
        assert_eq!(parsed.backend_protocol, "HTTP");
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn test_missing_scheme_fails() {
        let mut annotations = base();
        annotations.remove(&format!("{ANNOTATION_PREFIX}/scheme"));
        assert!(matches!(
            IngressAnnotations::parse(&annotations),
            Err(AnnotationError::Missing(_, "scheme"))
        ));
    }

    #[test]
    fn test_invalid_scheme_fails() {
        let mut annotations = base();
        annotations.insert(
            format!("{ANNOTATION_PREFIX}/scheme"),
            "public".to_string(),
        );
        assert!(matches!(
            IngressAnnotations::parse(&annotations),
            Err(AnnotationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_listen_ports_json() {
        let mut annotations = base();
        annotations.insert(
            format!("{ANNOTATION_PREFIX}/listen-ports"),
            r#"[{"HTTP": 80}, {"HTTPS": 443}]"#.to_string(),
        );
        let parsed = IngressAnnotations::parse(&annotations).expect("parse");
        assert_eq!(parsed.listen_ports.len(), 2);
        assert_eq!(parsed.listen_ports[1].protocol, "HTTPS");
        assert_eq!(parsed.listen_ports[1].port, 443);
    }

    #[test]
    fn test_malformed_listen_ports_fails() {
        let mut annotations = base();
        annotations.insert(
            format!("{ANNOTATION_PREFIX}/listen-ports"),
            "80,443".to_string(),
        );
        assert!(IngressAnnotations::parse(&annotations).is_err());
    }

    #[test]
    fn test_tags_csv() {
        let mut annotations = base();
        annotations.insert(
            format!("{ANNOTATION_PREFIX}/tags"),
            "Team=platform, Env=prod".to_string(),
        );
        let parsed = IngressAnnotations::parse(&annotations).expect("parse");
        assert_eq!(parsed.tags.get("Team").map(String::as_str), Some("platform"));
        assert_eq!(parsed.tags.get("Env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_idle_timeout_must_be_numeric() {
        let mut annotations = base();
        annotations.insert(
            format!("{ANNOTATION_PREFIX}/idle-timeout-seconds"),
            "sixty".to_string(),
        );
        assert!(IngressAnnotations::parse(&annotations).is_err());
    }
}
