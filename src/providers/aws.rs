//! AWS implementation: EC2 instances and volumes, RDS, CloudWatch Logs and
//! Cost Explorer. SDK shapes never leave this module.

use super::{Page, ProviderAdapter};
use crate::config::AppConfig;
use crate::cost::{parse_date, CostWindow, DATE_FORMAT};
use crate::error::FetchError;
use crate::models::{
    name_from_tags, CostEntry, Dataset, Resource, ResourceClass, ResourceDetails, Tag,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_costexplorer::types::{
    DateInterval, Granularity, GroupDefinition, GroupDefinitionType,
};
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::Filter;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

/// Cost Explorer metric reported for every service line.
const COST_METRIC: &str = "BlendedCost";

pub struct AwsAdapter {
    region: String,
    ec2: aws_sdk_ec2::Client,
    rds: aws_sdk_rds::Client,
    logs: aws_sdk_cloudwatchlogs::Client,
    cost: aws_sdk_costexplorer::Client,
}

impl AwsAdapter {
    pub async fn connect(cfg: &AppConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(cfg.aws_region.clone()));
        if let Some(profile) = &cfg.aws_profile {
            loader = loader.profile_name(profile);
        }
        let shared = loader.load().await;
        info!(region = %cfg.aws_region, profile = ?cfg.aws_profile, "loaded AWS configuration");

        Self {
            region: cfg.aws_region.clone(),
            ec2: aws_sdk_ec2::Client::new(&shared),
            rds: aws_sdk_rds::Client::new(&shared),
            logs: aws_sdk_cloudwatchlogs::Client::new(&shared),
            cost: aws_sdk_costexplorer::Client::new(&shared),
        }
    }

    async fn compute_page(&self, token: Option<String>) -> Result<Page<Resource>, FetchError> {
        let target = ResourceClass::ComputeInstance.as_label();
        let out = self
            .ec2
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("running")
                    .build(),
            )
            .set_next_token(token)
            .send()
            .await
            .map_err(|err| sdk_failure(target, err))?;

        let mut items = Vec::new();
        for reservation in out.reservations() {
            for instance in reservation.instances() {
                let Some(id) = instance.instance_id() else {
                    continue;
                };
                let tags: Vec<Tag> = instance
                    .tags()
                    .iter()
                    .map(|t| tag(t.key(), t.value()))
                    .collect();
                items.push(Resource {
                    id: id.to_string(),
                    name: name_from_tags(&tags),
                    class: ResourceClass::ComputeInstance,
                    region: self.region.clone(),
                    status: instance
                        .state()
                        .and_then(|s| s.name())
                        .map(|n| n.as_str().to_string())
                        .unwrap_or_default(),
                    created_at: instance
                        .launch_time()
                        .and_then(|t| to_utc(t.secs(), t.subsec_nanos())),
                    tags,
                    details: ResourceDetails::ComputeInstance {
                        instance_type: instance
                            .instance_type()
                            .map(|t| t.as_str().to_string())
                            .unwrap_or_default(),
                        availability_zone: instance
                            .placement()
                            .and_then(|p| p.availability_zone())
                            .map(str::to_string),
                        private_ip: instance.private_ip_address().map(str::to_string),
                    },
                });
            }
        }
        Ok(Page {
            items,
            next_token: out.next_token().map(str::to_string),
        })
    }

    async fn database_page(&self, token: Option<String>) -> Result<Page<Resource>, FetchError> {
        let target = ResourceClass::ManagedDatabase.as_label();
        let out = self
            .rds
            .describe_db_instances()
            .set_marker(token)
            .send()
            .await
            .map_err(|err| sdk_failure(target, err))?;

        let items = out
            .db_instances()
            .iter()
            .filter_map(|db| {
                let id = db.db_instance_identifier()?;
                let tags: Vec<Tag> = db
                    .tag_list()
                    .iter()
                    .map(|t| tag(t.key(), t.value()))
                    .collect();
                Some(Resource {
                    id: id.to_string(),
                    name: name_from_tags(&tags),
                    class: ResourceClass::ManagedDatabase,
                    region: self.region.clone(),
                    status: db.db_instance_status().unwrap_or_default().to_string(),
                    created_at: db
                        .instance_create_time()
                        .and_then(|t| to_utc(t.secs(), t.subsec_nanos())),
                    tags,
                    details: ResourceDetails::ManagedDatabase {
                        engine: db.engine().unwrap_or_default().to_string(),
                        engine_version: db.engine_version().unwrap_or_default().to_string(),
                        instance_class: db.db_instance_class().unwrap_or_default().to_string(),
                        allocated_storage_gib: db.allocated_storage().unwrap_or(0),
                        multi_az: db.multi_az().unwrap_or(false),
                    },
                })
            })
            .collect();
        Ok(Page {
            items,
            next_token: out.marker().map(str::to_string),
        })
    }

    async fn volume_page(&self, token: Option<String>) -> Result<Page<Resource>, FetchError> {
        let target = ResourceClass::BlockVolume.as_label();
        let out = self
            .ec2
            .describe_volumes()
            .set_next_token(token)
            .send()
            .await
            .map_err(|err| sdk_failure(target, err))?;

        let items = out
            .volumes()
            .iter()
            .filter_map(|volume| {
                let id = volume.volume_id()?;
                let tags: Vec<Tag> = volume
                    .tags()
                    .iter()
                    .map(|t| tag(t.key(), t.value()))
                    .collect();
                Some(Resource {
                    id: id.to_string(),
                    name: name_from_tags(&tags),
                    class: ResourceClass::BlockVolume,
                    region: self.region.clone(),
                    status: volume
                        .state()
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_default(),
                    created_at: volume
                        .create_time()
                        .and_then(|t| to_utc(t.secs(), t.subsec_nanos())),
                    tags,
                    details: ResourceDetails::BlockVolume {
                        size_gib: volume.size().unwrap_or(0),
                        volume_type: volume
                            .volume_type()
                            .map(|t| t.as_str().to_string())
                            .unwrap_or_default(),
                        availability_zone: volume.availability_zone().map(str::to_string),
                        encrypted: volume.encrypted().unwrap_or(false),
                        attached_to: volume
                            .attachments()
                            .iter()
                            .find_map(|a| a.instance_id())
                            .map(str::to_string),
                    },
                })
            })
            .collect();
        Ok(Page {
            items,
            next_token: out.next_token().map(str::to_string),
        })
    }

    async fn log_group_page(&self, token: Option<String>) -> Result<Page<Resource>, FetchError> {
        let target = ResourceClass::LogGroup.as_label();
        let out = self
            .logs
            .describe_log_groups()
            .set_next_token(token)
            .send()
            .await
            .map_err(|err| sdk_failure(target, err))?;

        let mut items = Vec::new();
        for group in out.log_groups() {
            let Some(name) = group.log_group_name() else {
                continue;
            };
            items.push(Resource {
                id: name.to_string(),
                name: name.to_string(),
                class: ResourceClass::LogGroup,
                region: self.region.clone(),
                status: "active".to_string(),
                created_at: group
                    .creation_time()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                tags: vec![],
                details: ResourceDetails::LogGroup {
                    arn: group.arn().map(str::to_string),
                    stored_bytes: group.stored_bytes().unwrap_or(0),
                    retention_days: group.retention_in_days(),
                    metric_filter_count: self.metric_filter_count(name).await,
                },
            });
        }
        Ok(Page {
            items,
            next_token: out.next_token().map(str::to_string),
        })
    }

    /// Counts the metric filters attached to one log group. A failed lookup
    /// counts as zero rather than failing the whole listing.
    async fn metric_filter_count(&self, log_group: &str) -> i32 {
        let mut count = 0usize;
        let mut token: Option<String> = None;
        loop {
            let out = match self
                .logs
                .describe_metric_filters()
                .log_group_name(log_group)
                .set_next_token(token.take())
                .send()
                .await
            {
                Ok(out) => out,
                Err(err) => {
                    warn!(
                        log_group,
                        error = %DisplayErrorContext(&err),
                        "metric filter lookup failed"
                    );
                    return 0;
                }
            };
            count += out.metric_filters().len();
            match out.next_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        clamp_count(count)
    }
}

#[async_trait]
impl ProviderAdapter for AwsAdapter {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn verify(&self) -> Result<(), FetchError> {
        self.ec2
            .describe_regions()
            .region_names(self.region.clone())
            .send()
            .await
            .map(|_| ())
            .map_err(|err| sdk_failure("aws", err))
    }

    async fn resource_page(
        &self,
        class: ResourceClass,
        token: Option<String>,
    ) -> Result<Page<Resource>, FetchError> {
        match class {
            ResourceClass::ComputeInstance => self.compute_page(token).await,
            ResourceClass::ManagedDatabase => self.database_page(token).await,
            ResourceClass::BlockVolume => self.volume_page(token).await,
            ResourceClass::LogGroup => self.log_group_page(token).await,
        }
    }

    async fn cost_page(
        &self,
        window: &CostWindow,
        token: Option<String>,
    ) -> Result<Page<CostEntry>, FetchError> {
        let target = Dataset::CostAndUsage.as_label();
        let period = DateInterval::builder()
            .start(window.start.format(DATE_FORMAT).to_string())
            .end(window.end.format(DATE_FORMAT).to_string())
            .build()
            .map_err(|err| FetchError::new(target, err.to_string()))?;
        let out = self
            .cost
            .get_cost_and_usage()
            .time_period(period)
            .granularity(Granularity::Daily)
            .metrics(COST_METRIC)
            .group_by(
                GroupDefinition::builder()
                    .r#type(GroupDefinitionType::Dimension)
                    .key("SERVICE")
                    .build(),
            )
            .set_next_page_token(token)
            .send()
            .await
            .map_err(|err| sdk_failure(target, err))?;

        let mut items = Vec::new();
        for by_time in out.results_by_time() {
            let Some(date) = by_time
                .time_period()
                .and_then(|p| parse_date(p.start()).ok())
            else {
                continue;
            };
            for group in by_time.groups() {
                let Some(metric) = group.metrics().and_then(|m| m.get(COST_METRIC)) else {
                    continue;
                };
                items.push(CostEntry {
                    service: group.keys().first().cloned().unwrap_or_default(),
                    amount: metric.amount().unwrap_or("0").to_string(),
                    unit: metric.unit().unwrap_or_default().to_string(),
                    date,
                });
            }
        }
        Ok(Page {
            items,
            next_token: out.next_page_token().map(str::to_string),
        })
    }
}

fn sdk_failure<E: std::error::Error + 'static>(target: &str, err: E) -> FetchError {
    FetchError::new(target, DisplayErrorContext(&err).to_string())
}

fn tag(key: Option<&str>, value: Option<&str>) -> Tag {
    Tag {
        key: key.unwrap_or_default().to_string(),
        value: value.unwrap_or_default().to_string(),
    }
}

fn clamp_count(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

fn to_utc(secs: i64, nanos: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, nanos)
}
