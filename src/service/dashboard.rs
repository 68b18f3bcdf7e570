use crate::database::sync::SyncRepository;
use crate::error::app_error::AppError;
use crate::models::dashboard::{DashboardResponse, SyncLimitState};
use crate::models::plan::plan_limit;
use crate::models::sync::{SyncStatus, UserSync};
use crate::models::user::User;
use crate::service::plan_quota;
use chrono::{DateTime, Utc};

pub struct DashboardService<'a, R: SyncRepository> {
    repository: &'a R,
}

impl<'a, R: SyncRepository> DashboardService<'a, R> {
    pub fn new(repository: &'a R) -> Self {
        Self { repository }
    }

    pub async fn summary(&self, user: &User) -> Result<DashboardResponse, AppError> {
        let syncs = self.repository.list_syncs(&user.id).await?;
        Ok(build_dashboard(user, &syncs, Utc::now()))
    }
}

fn build_dashboard(user: &User, syncs: &[UserSync], now: DateTime<Utc>) -> DashboardResponse {
    let total_syncs = syncs.len() as i64;
    let sync_limit = if plan_quota::can_create(&user.plan_type, total_syncs) {
        SyncLimitState::Available
    } else {
        SyncLimitState::Reached
    };

    DashboardResponse {
        total_syncs,
        active_syncs: syncs.iter().filter(|sync| sync.status == SyncStatus::Active).count() as i64,
        due_syncs: syncs.iter().filter(|sync| sync.is_due(now)).count() as i64,
        last_sync: syncs.iter().filter_map(|sync| sync.last_sync).max(),
        sync_limit,
        plan: user.plan_type.clone(),
        max_syncs: plan_limit(&user.plan_type).as_raw(),
        subscribed: user.is_subscribed(),
    }
}
