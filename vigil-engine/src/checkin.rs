use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use vigil_core::clock;
use vigil_core::types::{CheckInLog, CheckInMethod, User};
use vigil_core::{Result, VigilContext, VigilError};

pub const CHECK_IN_CYCLE_RANGE: std::ops::RangeInclusive<i32> = 7..=30;
pub const GRACE_PERIOD_RANGE: std::ops::RangeInclusive<i32> = 24..=72;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct CheckInStatus {
    pub last_check_in: Option<DateTime<Utc>>,
    pub next_check_in_due: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub hours_remaining: Option<i64>,
    pub is_overdue: bool,
    pub check_in_cycle: i32,
    pub grace_period: i32,
}

impl CheckInStatus {
    pub fn of(user: &User, now: DateTime<Utc>) -> Self {
        let next_due = clock::next_deadline(user.last_check_in, user.check_in_cycle);
        let remaining = clock::remaining(next_due, now);
        CheckInStatus {
            last_check_in: user.last_check_in,
            next_check_in_due: next_due,
            days_remaining: remaining.map(|r| r.days),
            hours_remaining: remaining.map(|r| r.hours),
            is_overdue: clock::is_overdue(user.last_check_in, user.check_in_cycle, user.grace_period, now),
            check_in_cycle: user.check_in_cycle,
            grace_period: user.grace_period,
        }
    }
}

/// Result of a successful check-in.
#[derive(Debug, Clone)]
pub struct CheckInReceipt {
    pub log: CheckInLog,
    pub next_check_in_due: Option<DateTime<Utc>>,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckInHistory {
    pub data: Vec<CheckInLog>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

pub struct CheckInService {
    ctx: VigilContext,
}

impl CheckInService {
    pub fn new(ctx: VigilContext) -> Self {
        Self { ctx }
    }

    /// The single mutation point for liveness: appends a log and moves
    /// `last_check_in` in one unit.
    pub async fn record(&self, user_id: Uuid, method: CheckInMethod) -> Result<CheckInReceipt> {
        let log = CheckInLog {
            id: Uuid::new_v4(),
            user_id,
            checked_at: Utc::now(),
            method,
        };

        let user = self
            .ctx
            .store
            .record_check_in(log.clone())
            .await?
            .ok_or(VigilError::UserNotFound)?;

        tracing::debug!("User {} checked in via {}", user_id, method);

        Ok(CheckInReceipt {
            next_check_in_due: clock::next_deadline(user.last_check_in, user.check_in_cycle),
            log,
            user,
        })
    }

    pub async fn status(&self, user_id: Uuid) -> Result<CheckInStatus> {
        let user = self.user(user_id).await?;
        Ok(CheckInStatus::of(&user, Utc::now()))
    }

    /// Only provided fields change.
    pub async fn update_settings(
        &self,
        user_id: Uuid,
        check_in_cycle: Option<i32>,
        grace_period: Option<i32>,
    ) -> Result<User> {
        if let Some(cycle) = check_in_cycle {
            if !CHECK_IN_CYCLE_RANGE.contains(&cycle) {
                return Err(VigilError::Validation(format!(
                    "check_in_cycle must be between {} and {} days",
                    CHECK_IN_CYCLE_RANGE.start(),
                    CHECK_IN_CYCLE_RANGE.end()
                )));
            }
        }
        if let Some(grace) = grace_period {
            if !GRACE_PERIOD_RANGE.contains(&grace) {
                return Err(VigilError::Validation(format!(
                    "grace_period must be between {} and {} hours",
                    GRACE_PERIOD_RANGE.start(),
                    GRACE_PERIOD_RANGE.end()
                )));
            }
        }

        self.ctx
            .store
            .update_check_in_settings(user_id, check_in_cycle, grace_period)
            .await?
            .ok_or(VigilError::UserNotFound)
    }

    /// Newest first. `page` is clamped to at least 1 and `limit` to 1..=100.
    /// A page past the end is empty.
    pub async fn history(&self, user_id: Uuid, page: i64, limit: i64) -> Result<CheckInHistory> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(limit);

        let (data, total) = self
            .ctx
            .store
            .check_in_history(user_id, offset, limit)
            .await?;

        Ok(CheckInHistory {
            data,
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        })
    }

    async fn user(&self, user_id: Uuid) -> Result<User> {
        self.ctx
            .store
            .get_user(user_id)
            .await?
            .ok_or(VigilError::UserNotFound)
    }
}
