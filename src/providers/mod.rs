use crate::config::{AppConfig, ProviderKind};
use crate::cost::{summarize, CostWindow};
use crate::error::{AppError, FetchError};
use crate::models::{CostEntry, CostSummary, Dataset, Resource, ResourceClass};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub mod aws;
pub mod fixture;

#[cfg(test)]
pub mod testing;

/// One page of a provider listing. `next_token` is `None` on the last page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// Maps one provider's native listings onto the domain model, a page at a
/// time. Pagination and the status filters live in [`ProviderGateway`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Startup probe: succeeds when the provider API answers.
    async fn verify(&self) -> Result<(), FetchError> {
        Ok(())
    }

    async fn resource_page(
        &self,
        class: ResourceClass,
        token: Option<String>,
    ) -> Result<Page<Resource>, FetchError>;

    async fn cost_page(
        &self,
        window: &CostWindow,
        token: Option<String>,
    ) -> Result<Page<CostEntry>, FetchError>;
}

pub struct ProviderGateway {
    adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderGateway {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self { adapter }
    }

    pub fn provider_name(&self) -> &'static str {
        self.adapter.name()
    }

    pub async fn verify(&self) -> Result<(), AppError> {
        self.adapter
            .verify()
            .await
            .map_err(|err| AppError::ProviderUnreachable {
                provider: self.adapter.name().to_string(),
                message: err.message,
            })
    }

    pub async fn fetch_compute(&self) -> Result<Vec<Resource>, FetchError> {
        self.fetch_class(ResourceClass::ComputeInstance).await
    }

    pub async fn fetch_databases(&self) -> Result<Vec<Resource>, FetchError> {
        self.fetch_class(ResourceClass::ManagedDatabase).await
    }

    pub async fn fetch_volumes(&self) -> Result<Vec<Resource>, FetchError> {
        self.fetch_class(ResourceClass::BlockVolume).await
    }

    pub async fn fetch_log_groups(&self) -> Result<Vec<Resource>, FetchError> {
        self.fetch_class(ResourceClass::LogGroup).await
    }

    /// Every page of `class`, reduced to the statuses the class publishes.
    pub async fn fetch_class(&self, class: ResourceClass) -> Result<Vec<Resource>, FetchError> {
        let target = Dataset::Resources(class).as_label();
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut token = None;
        loop {
            let page = self.adapter.resource_page(class, token).await?;
            out.extend(page.items.into_iter().filter(|r| class.admits(&r.status)));
            token = next_token(target, page.next_token, &mut seen)?;
            if token.is_none() {
                break;
            }
        }
        debug!(provider = self.adapter.name(), class = target, count = out.len(), "fetched resources");
        Ok(out)
    }

    pub async fn fetch_costs(&self, window: &CostWindow) -> Result<CostSummary, FetchError> {
        let target = Dataset::CostAndUsage.as_label();
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut token = None;
        loop {
            let page = self.adapter.cost_page(window, token).await?;
            entries.extend(page.items);
            token = next_token(target, page.next_token, &mut seen)?;
            if token.is_none() {
                break;
            }
        }
        debug!(provider = self.adapter.name(), count = entries.len(), "fetched cost entries");
        Ok(summarize(*window, entries))
    }
}

/// A token the provider already handed out would loop forever.
fn next_token(
    target: &str,
    token: Option<String>,
    seen: &mut HashSet<String>,
) -> Result<Option<String>, FetchError> {
    match token.filter(|t| !t.is_empty()) {
        Some(t) if !seen.insert(t.clone()) => Err(FetchError::new(
            target,
            format!("provider repeated continuation token '{t}'"),
        )),
        other => Ok(other),
    }
}

pub async fn build_adapter(cfg: &AppConfig) -> Result<Arc<dyn ProviderAdapter>, AppError> {
    match cfg.provider {
        ProviderKind::Aws => Ok(Arc::new(aws::AwsAdapter::connect(cfg).await)),
        ProviderKind::Fixture => {
            let path = cfg.fixture_path.as_deref().ok_or_else(|| {
                AppError::Config("provider 'fixture' requires fixture_path".into())
            })?;
            Ok(Arc::new(fixture::FixtureAdapter::load(path)?))
        }
    }
}
