//! # ALB Ingress Controller
//!
//! A Kubernetes controller that provisions AWS Application Load Balancers
//! for Ingress resources of its class.
//!
//! ## Overview
//!
//! 1. **Watching ingresses** - Monitors Ingress resources across all
//!    namespaces and filters by ingress class
//! 2. **Desired state translation** - Builds a load balancer resource tree
//!    (target groups, listeners, rules) from each ingress spec and its
//!    annotations
//! 3. **State assembly** - On startup, rediscovers the trees of previously
//!    created load balancers from the AWS APIs so restarts do not orphan
//!    or recreate infrastructure
//! 4. **Layered reconciliation** - Diffs desired against current per
//!    resource and issues the minimal create/modify/delete calls in
//!    dependency order
//! 5. **Prometheus metrics and probes** - HTTP endpoints for monitoring,
//!    liveness/readiness, and a JSON state dump
//!
//! See the [README.md](../README.md) for usage instructions.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use tracing::{error, info};

use alb_ingress_controller::alb::assembly;
use alb_ingress_controller::aws::elbv2::Elbv2Adapter;
use alb_ingress_controller::aws::waf::WafAdapter;
use alb_ingress_controller::aws::AwsServices;
use alb_ingress_controller::config::ControllerConfig;
use alb_ingress_controller::controller::Controller;
use alb_ingress_controller::ingress::{AlbIngress, IngressRegistry};
use alb_ingress_controller::k8s::KubeCluster;
use alb_ingress_controller::observability::metrics;
use alb_ingress_controller::server::{start_server, ServerState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alb_ingress_controller=info".into()),
        )
        .init();

    let config = ControllerConfig::parse();
    info!(
        cluster = %config.cluster_name,
        ingress_class = %config.ingress_class,
        "Starting ALB Ingress Controller"
    );

    metrics::register_metrics()?;

    let registry = Arc::new(IngressRegistry::default());

    // Start HTTP server for metrics and probes
    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        registry: Arc::clone(&registry),
    });
    {
        let server_state = Arc::clone(&server_state);
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, server_state).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let elbv2 = Arc::new(Elbv2Adapter::new(config.aws_region.clone(), config.aws_vpc_id.clone()).await);
    let waf = Arc::new(WafAdapter::new(config.aws_region.clone()).await);
    let aws = AwsServices {
        lb: elbv2.clone(),
        tg: elbv2.clone(),
        listener: elbv2.clone(),
        rule: elbv2.clone(),
        tag: elbv2,
        waf,
    };

    // Rediscover previously created load balancer trees before the first
    // reconcile pass so a restart never recreates existing infrastructure
    let assembled = assembly::assemble(&aws, &config.cluster_name)
        .await
        .context("Failed to assemble current state from AWS")?;
    info!("Assembled {} existing load balancer(s)", assembled.len());
    for ingress in assembled {
        let aggregate =
            AlbIngress::adopted(ingress.namespace, ingress.name, ingress.load_balancer);
        registry.insert(aggregate).await;
    }

    server_state
        .is_ready
        .store(true, std::sync::atomic::Ordering::Relaxed);

    let cluster = Arc::new(KubeCluster::new(client.clone()));
    Controller::new(client, config, registry, cluster, aws)
        .run()
        .await?;

    info!("Controller stopped");
    Ok(())
}
