//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;

use crate::providers::ProviderGateway;
use crate::refresh::RefreshController;
use crate::store::SnapshotStore;

/// Constructed once in `main` and shared by every request task.
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub controller: Arc<RefreshController>,
    /// Used directly by the uncached `/cost` query.
    pub gateway: Arc<ProviderGateway>,
    pub cost_window_days: u32,
    pub request_deadline: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<SnapshotStore>,
        controller: Arc<RefreshController>,
        gateway: Arc<ProviderGateway>,
    ) -> Self {
        let policy = controller.policy();
        Self {
            store,
            controller,
            gateway,
            cost_window_days: policy.cost_window_days,
            request_deadline: policy.deadline,
        }
    }
}
