//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics, health probes and the state snapshot
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Default full-sync interval between reconcile ticks (seconds)
pub const DEFAULT_SYNC_PERIOD_SECS: u64 = 60;

/// Default watchdog staleness window: a tick is forced if none has
/// completed within this many seconds (guards against dropped watch events)
pub const DEFAULT_WATCHDOG_SECS: u64 = 300;

/// Default ingress class handled by this controller
pub const DEFAULT_INGRESS_CLASS: &str = "alb";

/// Maximum number of attempts for a target group delete that keeps
/// returning `ResourceInUse` (a listener rule may still reference the group
/// during a concurrent delete elsewhere)
pub const TARGET_GROUP_DELETE_ATTEMPTS: u32 = 10;

/// Fixed sleep between target group delete attempts (seconds). The
/// interval is fixed, not exponential: rule deletion elsewhere frees the
/// group at a predictable pace.
pub const TARGET_GROUP_DELETE_INTERVAL_SECS: u64 = 10;

/// Delay before restarting the ingress watch stream after an error (seconds)
pub const WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Maximum length AWS allows for load balancer and target group names
pub const AWS_RESOURCE_NAME_MAX_LEN: usize = 32;

/// Annotation prefix for all controller-specific ingress annotations
pub const ANNOTATION_PREFIX: &str = "alb.ingress.kubernetes.io";

/// Annotation key selecting the ingress class
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Tag key carrying the owning cluster name on every managed AWS resource
pub const TAG_CLUSTER: &str = "kubernetes.io/cluster-name";

/// Tag key carrying the owning ingress namespace
pub const TAG_NAMESPACE: &str = "kubernetes.io/namespace";

/// Tag key carrying the owning ingress name
pub const TAG_INGRESS_NAME: &str = "kubernetes.io/ingress-name";

/// Tag key carrying the backing service name on a target group
pub const TAG_SERVICE_NAME: &str = "kubernetes.io/service-name";

/// Tag key carrying the backing service port on a target group
pub const TAG_SERVICE_PORT: &str = "kubernetes.io/service-port";

/// Load balancer attribute key for the idle timeout
pub const ATTR_IDLE_TIMEOUT: &str = "idle_timeout.timeout_seconds";

/// Rule priority reserved for the listener's default action. Default rules
/// are never independently created or deleted through the rule API.
pub const DEFAULT_RULE_PRIORITY: i64 = 0;
