//! Scripted in-memory adapter shared by the gateway, refresh and API tests.

use super::{Page, ProviderAdapter};
use crate::cost::CostWindow;
use crate::error::FetchError;
use crate::models::{CostEntry, Dataset, Resource, ResourceClass, ResourceDetails};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct ScriptedAdapter {
    resources: HashMap<ResourceClass, Vec<Resource>>,
    costs: Vec<CostEntry>,
    page_size: Option<usize>,
    latency: Option<Duration>,
    failures: Mutex<HashMap<Dataset, String>>,
    resource_calls: Mutex<HashMap<ResourceClass, usize>>,
    cost_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compute(self, resources: Vec<Resource>) -> Self {
        self.with_resources(ResourceClass::ComputeInstance, resources)
    }

    pub fn with_resources(mut self, class: ResourceClass, resources: Vec<Resource>) -> Self {
        self.resources.insert(class, resources);
        self
    }

    pub fn with_costs(mut self, costs: Vec<CostEntry>) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn failing(self, dataset: Dataset, message: &str) -> Self {
        self.set_failure(dataset, message);
        self
    }

    pub fn set_failure(&self, dataset: Dataset, message: &str) {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(dataset, message.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().expect("failures lock").clear();
    }

    pub fn calls(&self, class: ResourceClass) -> usize {
        self.resource_calls
            .lock()
            .expect("calls lock")
            .get(&class)
            .copied()
            .unwrap_or(0)
    }

    pub fn cost_calls(&self) -> usize {
        self.cost_calls.load(Ordering::SeqCst)
    }

    fn failure(&self, dataset: Dataset) -> Option<FetchError> {
        self.failures
            .lock()
            .expect("failures lock")
            .get(&dataset)
            .map(|message| FetchError::new(dataset.as_label(), message.clone()))
    }

    fn page_of<T: Clone>(&self, items: &[T], token: Option<String>) -> Page<T> {
        let offset: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let size = self.page_size.unwrap_or(usize::MAX);
        let end = offset.saturating_add(size).min(items.len());
        let start = offset.min(end);
        Page {
            items: items[start..end].to_vec(),
            next_token: (end < items.len()).then(|| end.to_string()),
        }
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn resource_page(
        &self,
        class: ResourceClass,
        token: Option<String>,
    ) -> Result<Page<Resource>, FetchError> {
        *self
            .resource_calls
            .lock()
            .expect("calls lock")
            .entry(class)
            .or_default() += 1;
        self.pause().await;
        if let Some(err) = self.failure(Dataset::Resources(class)) {
            return Err(err);
        }
        let items = self.resources.get(&class).cloned().unwrap_or_default();
        Ok(self.page_of(&items, token))
    }

    async fn cost_page(
        &self,
        window: &CostWindow,
        token: Option<String>,
    ) -> Result<Page<CostEntry>, FetchError> {
        self.cost_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(err) = self.failure(Dataset::CostAndUsage) {
            return Err(err);
        }
        let in_window: Vec<CostEntry> = self
            .costs
            .iter()
            .filter(|e| window.contains(e.date))
            .cloned()
            .collect();
        Ok(self.page_of(&in_window, token))
    }
}

fn resource(id: &str, class: ResourceClass, status: &str, details: ResourceDetails) -> Resource {
    Resource {
        id: id.to_string(),
        name: format!("{id}-name"),
        class,
        region: "us-east-1".into(),
        status: status.to_string(),
        created_at: None,
        tags: vec![],
        details,
    }
}

pub fn instance(id: &str, status: &str) -> Resource {
    resource(
        id,
        ResourceClass::ComputeInstance,
        status,
        ResourceDetails::ComputeInstance {
            instance_type: "t3.micro".into(),
            availability_zone: Some("us-east-1a".into()),
            private_ip: None,
        },
    )
}

pub fn database(id: &str, status: &str) -> Resource {
    resource(
        id,
        ResourceClass::ManagedDatabase,
        status,
        ResourceDetails::ManagedDatabase {
            engine: "postgres".into(),
            engine_version: "16.3".into(),
            instance_class: "db.t3.micro".into(),
            allocated_storage_gib: 20,
            multi_az: false,
        },
    )
}

pub fn volume(id: &str, status: &str) -> Resource {
    resource(
        id,
        ResourceClass::BlockVolume,
        status,
        ResourceDetails::BlockVolume {
            size_gib: 8,
            volume_type: "gp3".into(),
            availability_zone: Some("us-east-1a".into()),
            encrypted: true,
            attached_to: None,
        },
    )
}

pub fn log_group(name: &str) -> Resource {
    resource(
        name,
        ResourceClass::LogGroup,
        "active",
        ResourceDetails::LogGroup {
            arn: None,
            stored_bytes: 1024,
            retention_days: Some(14),
            metric_filter_count: 0,
        },
    )
}

/// One resource in every class plus a cost line inside any recent window.
pub fn populated() -> ScriptedAdapter {
    let today = chrono::Utc::now().date_naive();
    ScriptedAdapter::new()
        .with_compute(vec![instance("i-1", "running")])
        .with_resources(
            ResourceClass::ManagedDatabase,
            vec![database("db-1", "available")],
        )
        .with_resources(ResourceClass::BlockVolume, vec![volume("vol-1", "in-use")])
        .with_resources(ResourceClass::LogGroup, vec![log_group("/app/api")])
        .with_costs(vec![CostEntry {
            service: "ComputeX".into(),
            amount: "12.3400".into(),
            unit: "USD".into(),
            date: today.pred_opt().unwrap_or(today),
        }])
}
