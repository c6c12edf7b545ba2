//! File-backed provider for offline demos and end-to-end tests.
//!
//! The fixture is a JSON document:
//!
//! ```json
//! {
//!   "region": "eu-west-1",
//!   "page_size": 2,
//!   "latency_ms": 0,
//!   "compute": [{ "id": "i-1", "status": "running", "details": { "kind": "compute_instance", ... } }],
//!   "databases": [], "volumes": [], "log_groups": [],
//!   "costs": [{ "service": "ComputeX", "amount": "12.3400", "unit": "USD", "date": "2024-01-01" }],
//!   "failures": { "managed-database": "throttled" },
//!   "unreachable": false
//! }
//! ```
//!
//! `failures` keys are dataset labels (`compute-instance`, `managed-database`,
//! `block-volume`, `log-group`, `cost-and-usage`).

use super::{Page, ProviderAdapter};
use crate::cost::CostWindow;
use crate::error::{AppError, FetchError};
use crate::models::{CostEntry, Dataset, Resource, ResourceClass, ResourceDetails, Tag};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Deserialize)]
struct FixtureFile {
    region: Option<String>,
    page_size: Option<usize>,
    #[serde(default)]
    latency_ms: u64,
    #[serde(default)]
    compute: Vec<FixtureResource>,
    #[serde(default)]
    databases: Vec<FixtureResource>,
    #[serde(default)]
    volumes: Vec<FixtureResource>,
    #[serde(default)]
    log_groups: Vec<FixtureResource>,
    #[serde(default)]
    costs: Vec<CostEntry>,
    #[serde(default)]
    failures: HashMap<String, String>,
    #[serde(default)]
    unreachable: bool,
}

#[derive(Debug, Deserialize)]
struct FixtureResource {
    id: String,
    #[serde(default)]
    name: String,
    region: Option<String>,
    status: String,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<Tag>,
    details: ResourceDetails,
}

pub struct FixtureAdapter {
    resources: HashMap<ResourceClass, Vec<Resource>>,
    costs: Vec<CostEntry>,
    failures: HashMap<Dataset, String>,
    page_size: usize,
    latency: Duration,
    unreachable: bool,
}

impl FixtureAdapter {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("cannot read fixture {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let file: FixtureFile = serde_json::from_str(raw)?;
        let region = file.region.unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut failures = HashMap::new();
        for (label, message) in file.failures {
            failures.insert(parse_dataset(&label)?, message);
        }

        let mut resources = HashMap::new();
        for (class, rows) in [
            (ResourceClass::ComputeInstance, file.compute),
            (ResourceClass::ManagedDatabase, file.databases),
            (ResourceClass::BlockVolume, file.volumes),
            (ResourceClass::LogGroup, file.log_groups),
        ] {
            let mapped = rows
                .into_iter()
                .map(|row| Resource {
                    id: row.id,
                    name: row.name,
                    class,
                    region: row.region.unwrap_or_else(|| region.clone()),
                    status: row.status,
                    created_at: row.created_at,
                    tags: row.tags,
                    details: row.details,
                })
                .collect();
            resources.insert(class, mapped);
        }

        Ok(Self {
            resources,
            costs: file.costs,
            failures,
            page_size: file.page_size.unwrap_or(100).max(1),
            latency: Duration::from_millis(file.latency_ms),
            unreachable: file.unreachable,
        })
    }

    fn check(&self, dataset: Dataset) -> Result<(), FetchError> {
        match self.failures.get(&dataset) {
            Some(message) => Err(FetchError::new(dataset.as_label(), message.clone())),
            None => Ok(()),
        }
    }

    fn page_of<T: Clone>(&self, items: &[T], token: Option<String>) -> Result<Page<T>, FetchError> {
        let offset = match token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| FetchError::new("fixture", format!("bad page token '{t}'")))?,
            None => 0,
        };
        let end = offset.saturating_add(self.page_size).min(items.len());
        let start = offset.min(end);
        Ok(Page {
            items: items[start..end].to_vec(),
            next_token: (end < items.len()).then(|| end.to_string()),
        })
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn parse_dataset(label: &str) -> Result<Dataset, AppError> {
    if label == Dataset::CostAndUsage.as_label() {
        return Ok(Dataset::CostAndUsage);
    }
    ResourceClass::from_label(label)
        .map(Dataset::Resources)
        .ok_or_else(|| AppError::Config(format!("unknown fixture dataset '{label}'")))
}

#[async_trait]
impl ProviderAdapter for FixtureAdapter {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn verify(&self) -> Result<(), FetchError> {
        if self.unreachable {
            return Err(FetchError::new("fixture", "fixture marked unreachable"));
        }
        Ok(())
    }

    async fn resource_page(
        &self,
        class: ResourceClass,
        token: Option<String>,
    ) -> Result<Page<Resource>, FetchError> {
        self.pause().await;
        self.check(Dataset::Resources(class))?;
        let items = self.resources.get(&class).map(Vec::as_slice).unwrap_or(&[]);
        self.page_of(items, token)
    }

    async fn cost_page(
        &self,
        window: &CostWindow,
        token: Option<String>,
    ) -> Result<Page<CostEntry>, FetchError> {
        self.pause().await;
        self.check(Dataset::CostAndUsage)?;
        let in_window: Vec<CostEntry> = self
            .costs
            .iter()
            .filter(|e| window.contains(e.date))
            .cloned()
            .collect();
        self.page_of(&in_window, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::parse_date;
    use crate::providers::ProviderGateway;
    use std::sync::Arc;

    const FIXTURE: &str = r#"{
        "region": "eu-west-1",
        "page_size": 1,
        "compute": [
            { "id": "i-1", "name": "web", "status": "running",
              "details": { "kind": "compute_instance", "instance_type": "t3.small",
                           "availability_zone": "eu-west-1a", "private_ip": "10.0.0.4" } },
            { "id": "i-2", "status": "stopped",
              "details": { "kind": "compute_instance", "instance_type": "t3.small",
                           "availability_zone": null, "private_ip": null } }
        ],
        "log_groups": [
            { "id": "/aws/lambda/a", "region": "us-west-2", "status": "active",
              "details": { "kind": "log_group", "arn": null, "stored_bytes": 10,
                           "retention_days": null, "metric_filter_count": 1 } }
        ],
        "costs": [
            { "service": "ComputeX", "amount": "12.3400", "unit": "USD", "date": "2024-01-01" },
            { "service": "ComputeX", "amount": "3.00", "unit": "USD", "date": "2024-01-05" }
        ],
        "failures": { "managed-database": "throttled" }
    }"#;

    #[tokio::test]
    async fn fixture_maps_rows_and_pages_through_gateway() {
        let adapter = FixtureAdapter::from_json(FIXTURE).expect("fixture parses");
        let gateway = ProviderGateway::new(Arc::new(adapter));

        let compute = gateway.fetch_compute().await.expect("compute");
        assert_eq!(compute.len(), 1);
        assert_eq!(compute[0].name, "web");
        assert_eq!(compute[0].region, "eu-west-1");
        assert_eq!(compute[0].class, ResourceClass::ComputeInstance);

        let logs = gateway.fetch_log_groups().await.expect("log groups");
        assert_eq!(logs[0].region, "us-west-2");
        assert!(gateway.fetch_volumes().await.expect("volumes").is_empty());
    }

    #[tokio::test]
    async fn fixture_failures_surface_per_dataset() {
        let adapter = FixtureAdapter::from_json(FIXTURE).expect("fixture parses");
        let err = adapter
            .resource_page(ResourceClass::ManagedDatabase, None)
            .await
            .expect_err("databases fail");
        assert_eq!(err.target, "managed-database");
        assert_eq!(err.message, "throttled");
    }

    #[tokio::test]
    async fn fixture_costs_are_limited_to_window() {
        let adapter = FixtureAdapter::from_json(FIXTURE).expect("fixture parses");
        let window = CostWindow::new(
            parse_date("2024-01-01").expect("date"),
            parse_date("2024-01-02").expect("date"),
        )
        .expect("window");
        let page = adapter.cost_page(&window, None).await.expect("costs");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].amount, "12.3400");
        assert!(page.next_token.is_none());
    }

    #[test]
    fn unknown_failure_label_is_a_config_error() {
        let err = FixtureAdapter::from_json(r#"{ "failures": { "buckets": "x" } }"#)
            .err()
            .expect("unknown dataset rejected");
        assert!(err.to_string().contains("unknown fixture dataset"));
    }

    #[tokio::test]
    async fn unreachable_fixture_fails_verify() {
        let adapter = FixtureAdapter::from_json(r#"{ "unreachable": true }"#).expect("fixture");
        assert!(adapter.verify().await.is_err());
    }
}
