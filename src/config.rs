//! # Controller Configuration
//!
//! Runtime configuration, parsed from command-line flags with environment
//! variable fallbacks so the same binary works in a Deployment manifest
//! and on a developer machine.

use clap::Parser;

use crate::constants::{
    DEFAULT_HEALTH_PORT, DEFAULT_INGRESS_CLASS, DEFAULT_SYNC_PERIOD_SECS, DEFAULT_WATCHDOG_SECS,
};

/// AWS ALB ingress controller
#[derive(Debug, Clone, Parser)]
#[command(name = "alb-ingress-controller", version)]
pub struct ControllerConfig {
    /// Name of the Kubernetes cluster this controller manages. Part of
    /// every generated AWS resource name and ownership tag.
    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster_name: String,

    /// Ingress class this controller is responsible for; ingresses with a
    /// different class annotation are ignored
    #[arg(long, env = "INGRESS_CLASS", default_value = DEFAULT_INGRESS_CLASS)]
    pub ingress_class: String,

    /// AWS region; falls back to the SDK default provider chain when unset
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// VPC the target groups are created in
    #[arg(long, env = "AWS_VPC_ID")]
    pub aws_vpc_id: String,

    /// Interval between full reconcile passes (seconds)
    #[arg(long, env = "SYNC_PERIOD_SECS", default_value_t = DEFAULT_SYNC_PERIOD_SECS)]
    pub sync_period_secs: u64,

    /// Watchdog staleness window: force a pass if none completed within
    /// this many seconds (seconds)
    #[arg(long, env = "WATCHDOG_SECS", default_value_t = DEFAULT_WATCHDOG_SECS)]
    pub watchdog_secs: u64,

    /// Port for the metrics/probe/state HTTP server
    #[arg(long, env = "HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    pub health_port: u16,
}
