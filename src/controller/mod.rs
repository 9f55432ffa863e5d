//! # Controller
//!
//! The main control loop. Three triggers funnel into one synchronization
//! path: ingress watch events, a fixed periodic interval, and a watchdog
//! that fires when no pass has completed within its staleness window
//! (watch streams can silently drop events across API server restarts).
//!
//! Every pass lists the ingresses of the configured class, rebuilds each
//! aggregate's desired state, and reconciles all aggregates concurrently,
//! one task per ingress. Ingresses that vanished from the cluster are
//! torn down and dropped from the registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{api::ListParams, Api, Client};
use kube_runtime::watcher;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::alb::ReconcileCtx;
use crate::aws::AwsServices;
use crate::config::ControllerConfig;
use crate::constants::{INGRESS_CLASS_ANNOTATION, WATCH_RESTART_DELAY_SECS};
use crate::ingress::{AlbIngress, IngressRegistry};
use crate::k8s::{ClusterInfo, IngressEventSink};
use crate::observability::metrics;

pub struct Controller {
    client: Client,
    config: ControllerConfig,
    registry: Arc<IngressRegistry>,
    cluster: Arc<dyn ClusterInfo>,
    aws: AwsServices,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn new(
        client: Client,
        config: ControllerConfig,
        registry: Arc<IngressRegistry>,
        cluster: Arc<dyn ClusterInfo>,
        aws: AwsServices,
    ) -> Self {
        Self {
            client,
            config,
            registry,
            cluster,
            aws,
        }
    }

    /// Run the control loop until the process is stopped
    pub async fn run(self) -> Result<()> {
        let notify = Arc::new(Notify::new());
        let last_pass = Arc::new(std::sync::Mutex::new(Instant::now()));

        // Watch task: any ingress change triggers a full pass. The watcher
        // recovers from stream errors itself; the sleep throttles restarts.
        {
            let notify = Arc::clone(&notify);
            let api: Api<Ingress> = Api::all(self.client.clone());
            tokio::spawn(async move {
                let mut stream = std::pin::pin!(watcher(api, watcher::Config::default()));
                while let Some(event) = stream.next().await {
                    match event {
                        Ok(_) => notify.notify_one(),
                        Err(e) => {
                            warn!("Ingress watch error: {e}");
                            tokio::time::sleep(Duration::from_secs(WATCH_RESTART_DELAY_SECS))
                                .await;
                        }
                    }
                }
            });
        }

        // Watchdog task: force a pass when none completed recently
        {
            let notify = Arc::clone(&notify);
            let last_pass = Arc::clone(&last_pass);
            let window = Duration::from_secs(self.config.watchdog_secs);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(window / 2);
                loop {
                    ticker.tick().await;
                    let stale = last_pass.lock().map(|t| t.elapsed() > window);
                    if let Ok(true) = stale {
                        warn!("No reconcile pass within the watchdog window, forcing one");
                        notify.notify_one();
                    }
                }
            });
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.sync_period_secs));
        info!(
            cluster = %self.config.cluster_name,
            ingress_class = %self.config.ingress_class,
            "Controller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => debug!("Periodic sync"),
                () = notify.notified() => debug!("Triggered sync"),
            }

            let started = Instant::now();
            metrics::increment_reconciliations();
            if let Err(e) = self.sync().await {
                error!("Sync pass failed: {e:#}");
                metrics::increment_reconciliation_errors();
            }
            metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());
            if let Ok(mut t) = last_pass.lock() {
                *t = Instant::now();
            }
        }
    }

    /// One full synchronization pass over every ingress of our class
    async fn sync(&self) -> Result<()> {
        let api: Api<Ingress> = Api::all(self.client.clone());
        let ingresses = api
            .list(&ListParams::default())
            .await
            .context("listing ingresses")?;

        let mut seen = Vec::new();
        let mut tasks = JoinSet::new();

        for ingress in ingresses {
            if !is_managed(&ingress, &self.config.ingress_class) {
                continue;
            }
            let (Some(namespace), Some(name)) = (
                ingress.metadata.namespace.clone(),
                ingress.metadata.name.clone(),
            ) else {
                continue;
            };
            let key = AlbIngress::key(&namespace, &name);
            seen.push(key.clone());

            let entry = self
                .registry
                .get_or_insert_with(&key, || AlbIngress {
                    id: key.clone(),
                    namespace: namespace.clone(),
                    name: name.clone(),
                    tainted: false,
                    last_error: None,
                    last_reconciled_at: None,
                    load_balancer: None,
                })
                .await;

            let cluster_name = self.config.cluster_name.clone();
            let cluster = Arc::clone(&self.cluster);
            let ctx = ReconcileCtx {
                aws: self.aws.clone(),
                events: Arc::new(IngressEventSink::new(self.client.clone(), &namespace, &name)),
            };
            tasks.spawn(async move {
                let mut aggregate = entry.lock().await;
                match AlbIngress::from_ingress(&ingress, Some(&aggregate), &cluster_name, &*cluster)
                    .await
                {
                    Ok(rebuilt) => *aggregate = rebuilt,
                    Err(e) => {
                        aggregate.taint(&format!("{e:#}"));
                        return;
                    }
                }
                aggregate.reconcile(&ctx).await;
            });
        }

        // Ingresses that vanished from the cluster: tear their trees down
        for key in self.registry.keys().await {
            if seen.contains(&key) {
                continue;
            }
            let Some(entry) = self.registry.get(&key).await else { continue };
            let (namespace, name) = match key.split_once('/') {
                Some((ns, n)) => (ns.to_string(), n.to_string()),
                None => continue,
            };
            let ctx = ReconcileCtx {
                aws: self.aws.clone(),
                events: Arc::new(IngressEventSink::new(self.client.clone(), &namespace, &name)),
            };
            tasks.spawn(async move {
                let mut aggregate = entry.lock().await;
                info!(ingress = %aggregate.id, "Ingress removed, tearing down");
                aggregate.strip_desired();
                aggregate.reconcile(&ctx).await;
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Reconcile task panicked: {e}");
            }
        }

        // Drop fully torn-down entries
        for key in self.registry.keys().await {
            let Some(entry) = self.registry.get(&key).await else { continue };
            let torn_down = {
                let aggregate = entry.lock().await;
                !seen.contains(&key) && aggregate.is_torn_down()
            };
            if torn_down {
                self.registry.remove(&key).await;
            }
        }

        metrics::set_managed_ingresses(i64::try_from(self.registry.len().await).unwrap_or(0));
        Ok(())
    }
}

/// True when the ingress carries our class, either via the legacy
/// annotation or the `ingressClassName` spec field
fn is_managed(ingress: &Ingress, ingress_class: &str) -> bool {
    if let Some(class) = ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
    {
        return class == ingress_class;
    }
    ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.as_deref())
        .is_some_and(|class| class == ingress_class)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingress(annotation: Option<&str>, class_name: Option<&str>) -> Ingress {
        let mut value = serde_json::json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {}
        });
        if let Some(class) = annotation {
            value["metadata"]["annotations"] =
                serde_json::json!({INGRESS_CLASS_ANNOTATION: class});
        }
        if let Some(class) = class_name {
            value["spec"]["ingressClassName"] = serde_json::json!(class);
        }
        serde_json::from_value(value).expect("valid ingress")
    }

    #[test]
    fn test_is_managed_by_annotation() {
        assert!(is_managed(&ingress(Some("alb"), None), "alb"));
        assert!(!is_managed(&ingress(Some("nginx"), None), "alb"));
    }

    #[test]
    fn test_is_managed_by_class_name() {
        assert!(is_managed(&ingress(None, Some("alb")), "alb"));
        assert!(!is_managed(&ingress(None, Some("nginx")), "alb"));
    }

    #[test]
    fn test_annotation_takes_precedence() {
        assert!(!is_managed(&ingress(Some("nginx"), Some("alb")), "alb"));
    }

    #[test]
    fn test_unclassed_ingress_is_ignored() {
        assert!(!is_managed(&ingress(None, None), "alb"));
    }
}
