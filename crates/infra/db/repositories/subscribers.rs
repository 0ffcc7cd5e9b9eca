use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::subscribers},
};
use domain::{
    entities::subscribers::{LastPayment, SubscriberEntity, SubscriberRow, SubscriptionActivation},
    repositories::subscribers::SubscriberRepository,
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};

pub struct SubscriberPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriberPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriberRepository for SubscriberPostgres {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<SubscriberEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = subscribers::table
            .filter(subscribers::user_id.eq(user_id))
            .select(SubscriberRow::as_select())
            .first::<SubscriberRow>(&mut conn)
            .optional()?;

        Ok(row.map(SubscriberEntity::from))
    }

    async fn activate_subscription(
        &self,
        user_id: Uuid,
        activation: SubscriptionActivation,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        let updated = update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::subscribed.eq(true),
                subscribers::subscription_tier.eq(Some(activation.tier.clone())),
                subscribers::subscription_status.eq(SubscriptionStatus::Active.to_string()),
                subscribers::subscription_start.eq(Some(activation.starts_at)),
                subscribers::subscription_end.eq(Some(activation.ends_at)),
                subscribers::preapproval_id.eq(activation.preapproval_id.clone()),
                subscribers::cancel_at_period_end.eq(false),
                subscribers::grace_period_end.eq(None::<DateTime<Utc>>),
                subscribers::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            insert_into(subscribers::table)
                .values((
                    subscribers::user_id.eq(user_id),
                    subscribers::subscribed.eq(true),
                    subscribers::subscription_tier.eq(Some(activation.tier.clone())),
                    subscribers::subscription_status
                        .eq(SubscriptionStatus::Active.to_string()),
                    subscribers::subscription_start.eq(Some(activation.starts_at)),
                    subscribers::subscription_end.eq(Some(activation.ends_at)),
                    subscribers::preapproval_id.eq(activation.preapproval_id.clone()),
                ))
                .execute(&mut conn)?;
        }

        if let Some(payment) = activation.last_payment {
            let method = payment
                .method
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?;

            update(subscribers::table)
                .filter(subscribers::user_id.eq(user_id))
                .set((
                    subscribers::payment_method.eq(method),
                    subscribers::last_payment_amount_minor.eq(Some(payment.amount_minor)),
                    subscribers::last_payment_currency.eq(Some(payment.currency)),
                    subscribers::last_payment_status.eq(Some(payment.status)),
                    subscribers::last_payment_date.eq(Some(payment.paid_at)),
                    subscribers::updated_at.eq(now),
                ))
                .execute(&mut conn)?;
        }

        Ok(())
    }

    async fn clear_subscription(&self, user_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::subscribed.eq(false),
                subscribers::subscription_tier.eq(None::<String>),
                subscribers::subscription_status.eq(SubscriptionStatus::Cancelled.to_string()),
                subscribers::preapproval_id.eq(None::<String>),
                subscribers::cancel_at_period_end.eq(false),
                subscribers::pending_plan_change.eq(None::<String>),
                subscribers::plan_change_effective_date.eq(None::<DateTime<Utc>>),
                subscribers::grace_period_end.eq(None::<DateTime<Utc>>),
                subscribers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn update_subscription_status(
        &self,
        user_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::subscription_status.eq(status.to_string()),
                subscribers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn record_last_payment(&self, user_id: Uuid, payment: LastPayment) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let method = payment
            .method
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::payment_method.eq(method),
                subscribers::last_payment_amount_minor.eq(Some(payment.amount_minor)),
                subscribers::last_payment_currency.eq(Some(payment.currency)),
                subscribers::last_payment_status.eq(Some(payment.status)),
                subscribers::last_payment_date.eq(Some(payment.paid_at)),
                subscribers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn set_grace_period(
        &self,
        user_id: Uuid,
        grace_period_end: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::grace_period_end.eq(grace_period_end),
                subscribers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn start_trial(
        &self,
        user_id: Uuid,
        trial_start: DateTime<Utc>,
        trial_end: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::trial_active.eq(true),
                subscribers::trial_start.eq(Some(trial_start)),
                subscribers::trial_end.eq(Some(trial_end)),
                subscribers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            insert_into(subscribers::table)
                .values((
                    subscribers::user_id.eq(user_id),
                    subscribers::trial_active.eq(true),
                    subscribers::trial_start.eq(Some(trial_start)),
                    subscribers::trial_end.eq(Some(trial_end)),
                ))
                .execute(&mut conn)?;
        }

        Ok(())
    }

    async fn set_cancel_at_period_end(&self, user_id: Uuid, cancel: bool) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::cancel_at_period_end.eq(cancel),
                subscribers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn set_pending_plan_change(
        &self,
        user_id: Uuid,
        plan_id: String,
        effective_date: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::pending_plan_change.eq(Some(plan_id)),
                subscribers::plan_change_effective_date.eq(Some(effective_date)),
                subscribers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn apply_plan_change(&self, user_id: Uuid, plan_id: String) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscribers::table)
            .filter(subscribers::user_id.eq(user_id))
            .set((
                subscribers::subscription_tier.eq(Some(plan_id)),
                subscribers::pending_plan_change.eq(None::<String>),
                subscribers::plan_change_effective_date.eq(None::<DateTime<Utc>>),
                subscribers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn find_due_plan_changes(&self, now: DateTime<Utc>) -> Result<Vec<SubscriberEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = subscribers::table
            .filter(subscribers::pending_plan_change.is_not_null())
            .filter(subscribers::plan_change_effective_date.le(now))
            .select(SubscriberRow::as_select())
            .load::<SubscriberRow>(&mut conn)?;

        Ok(rows.into_iter().map(SubscriberEntity::from).collect())
    }
}
