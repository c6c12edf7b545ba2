use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    ComputeInstance,
    ManagedDatabase,
    BlockVolume,
    LogGroup,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::ComputeInstance,
        ResourceClass::ManagedDatabase,
        ResourceClass::BlockVolume,
        ResourceClass::LogGroup,
    ];

    pub fn as_label(self) -> &'static str {
        match self {
            ResourceClass::ComputeInstance => "compute-instance",
            ResourceClass::ManagedDatabase => "managed-database",
            ResourceClass::BlockVolume => "block-volume",
            ResourceClass::LogGroup => "log-group",
        }
    }

    /// Path segment of the per-class endpoint.
    pub fn route_slug(self) -> &'static str {
        match self {
            ResourceClass::ComputeInstance => "ec2",
            ResourceClass::ManagedDatabase => "rds",
            ResourceClass::BlockVolume => "ebs",
            ResourceClass::LogGroup => "cloudwatch-logs",
        }
    }

    pub fn from_label(input: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_label() == input)
    }

    /// Only running instances and available databases are published; volumes
    /// and log groups are kept in every state.
    pub fn admits(self, status: &str) -> bool {
        match self {
            ResourceClass::ComputeInstance => status == "running",
            ResourceClass::ManagedDatabase => status == "available",
            ResourceClass::BlockVolume | ResourceClass::LogGroup => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub class: ResourceClass,
    pub region: String,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub details: ResourceDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDetails {
    ComputeInstance {
        instance_type: String,
        availability_zone: Option<String>,
        private_ip: Option<String>,
    },
    ManagedDatabase {
        engine: String,
        engine_version: String,
        instance_class: String,
        allocated_storage_gib: i32,
        multi_az: bool,
    },
    BlockVolume {
        size_gib: i32,
        volume_type: String,
        availability_zone: Option<String>,
        encrypted: bool,
        attached_to: Option<String>,
    },
    LogGroup {
        arn: Option<String>,
        stored_bytes: i64,
        retention_days: Option<i32>,
        metric_filter_count: i32,
    },
}

/// Picks the display name out of a provider's tag set.
pub fn name_from_tags(tags: &[Tag]) -> String {
    tags.iter()
        .find(|t| t.key == "Name")
        .map(|t| t.value.clone())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostEntry {
    pub service: String,
    /// Exact decimal string as returned by the billing API.
    pub amount: String,
    pub unit: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceTotal {
    pub service: String,
    pub amount: String,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostSummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub entries: Vec<CostEntry>,
    pub totals: Vec<ServiceTotal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    pub compute: Vec<Resource>,
    pub databases: Vec<Resource>,
    pub volumes: Vec<Resource>,
    pub log_groups: Vec<Resource>,
}

impl Inventory {
    pub fn class(&self, class: ResourceClass) -> &[Resource] {
        match class {
            ResourceClass::ComputeInstance => &self.compute,
            ResourceClass::ManagedDatabase => &self.databases,
            ResourceClass::BlockVolume => &self.volumes,
            ResourceClass::LogGroup => &self.log_groups,
        }
    }

    pub fn set_class(&mut self, class: ResourceClass, resources: Vec<Resource>) {
        match class {
            ResourceClass::ComputeInstance => self.compute = resources,
            ResourceClass::ManagedDatabase => self.databases = resources,
            ResourceClass::BlockVolume => self.volumes = resources,
            ResourceClass::LogGroup => self.log_groups = resources,
        }
    }

    /// All classes merged in class order.
    pub fn merged(&self) -> Vec<&Resource> {
        ResourceClass::ALL
            .into_iter()
            .flat_map(|c| self.class(c).iter())
            .collect()
    }

    pub fn counts(&self) -> ResourceCounts {
        ResourceCounts {
            compute: self.compute.len(),
            databases: self.databases.len(),
            volumes: self.volumes.len(),
            log_groups: self.log_groups.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceCounts {
    pub compute: usize,
    pub databases: usize,
    pub volumes: usize,
    pub log_groups: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Dataset {
    Resources(ResourceClass),
    CostAndUsage,
}

impl Dataset {
    pub fn as_label(self) -> &'static str {
        match self {
            Dataset::Resources(class) => class.as_label(),
            Dataset::CostAndUsage => "cost-and-usage",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub cycle: u64,
    pub inventory: Inventory,
    pub cost: CostSummary,
    pub last_refreshed: DateTime<Utc>,
    pub degraded: Vec<Dataset>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshStats {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u128,
    pub resources: ResourceCounts,
    pub cost_entries: usize,
    pub degraded: Vec<Dataset>,
    /// True when the caller waited on a cycle another trigger had started.
    pub shared: bool,
}
