//! # WAFv2 Adapter
//!
//! Wrapper over the AWS WAFv2 SDK client implementing web ACL
//! association for application load balancers.

use std::time::Instant;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_wafv2::error::ProvideErrorMetadata;
use aws_sdk_wafv2::Client;
use tracing::debug;

use crate::observability::metrics;

use super::{AwsError, WafOps};

pub struct WafAdapter {
    client: Client,
}

impl std::fmt::Debug for WafAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WafAdapter").finish_non_exhaustive()
    }
}

impl WafAdapter {
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        debug!("WAFv2 client configured");
        Self {
            client: Client::new(&config),
        }
    }
}

/// WAFv2 spells missing resources `WAFNonexistentItemException`
fn classify<E>(operation: &'static str, err: E) -> AwsError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    metrics::increment_aws_api_errors(operation);
    let code = err.code().unwrap_or_default().to_string();
    let message = err
        .message()
        .map_or_else(|| err.to_string(), str::to_string);

    if code.contains("NonexistentItem") || code.contains("NotFound") {
        AwsError::NotFound { operation, message }
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

fn record(operation: &str, started: Instant) {
    metrics::record_aws_api_call(operation, started.elapsed().as_secs_f64());
}

#[async_trait]
impl WafOps for WafAdapter {
    async fn associate_web_acl(
        &self,
        web_acl_arn: &str,
        resource_arn: &str,
    ) -> Result<(), AwsError> {
        const OP: &str = "AssociateWebAcl";
        let started = Instant::now();
        self.client
            .associate_web_acl()
            .web_acl_arn(web_acl_arn)
            .resource_arn(resource_arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn disassociate_web_acl(&self, resource_arn: &str) -> Result<(), AwsError> {
        const OP: &str = "DisassociateWebAcl";
        let started = Instant::now();
        self.client
            .disassociate_web_acl()
            .resource_arn(resource_arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);
        Ok(())
    }

    async fn web_acl_for_resource(&self, resource_arn: &str) -> Result<Option<String>, AwsError> {
        const OP: &str = "GetWebAclForResource";
        let started = Instant::now();
        let output = self
            .client
            .get_web_acl_for_resource()
            .resource_arn(resource_arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        record(OP, started);

        Ok(output
            .web_acl()
            .map(|acl| acl.arn().to_string()))
    }
}
