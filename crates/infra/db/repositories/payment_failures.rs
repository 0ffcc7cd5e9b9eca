use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::payment_failures},
};
use domain::{
    entities::payment_failures::{NewPaymentFailureEntity, PaymentFailureEntity},
    repositories::payment_failures::PaymentFailureRepository,
};

pub struct PaymentFailurePostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentFailurePostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentFailureRepository for PaymentFailurePostgres {
    async fn record_failure(&self, failure: NewPaymentFailureEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = insert_into(payment_failures::table)
            .values(&failure)
            .returning(payment_failures::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(result)
    }

    async fn find_due_retries(&self, now: DateTime<Utc>) -> Result<Vec<PaymentFailureEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = payment_failures::table
            .filter(payment_failures::next_retry_date.le(now))
            .filter(payment_failures::processed_at.is_null())
            .filter(payment_failures::attempt_number.lt(payment_failures::max_retry_attempts))
            .order(payment_failures::next_retry_date.asc())
            .select(PaymentFailureEntity::as_select())
            .load::<PaymentFailureEntity>(&mut conn)?;

        Ok(results)
    }

    async fn claim_for_retry(&self, failure_id: Uuid, claimed_at: DateTime<Utc>) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // The processed_at guard makes this a single-winner claim even when
        // two sweep instances race on the same failure.
        let claimed = update(payment_failures::table)
            .filter(payment_failures::id.eq(failure_id))
            .filter(payment_failures::processed_at.is_null())
            .set(payment_failures::processed_at.eq(claimed_at))
            .execute(&mut conn)?;

        Ok(claimed == 1)
    }

    async fn resolve_for_user(&self, user_id: Uuid, resolved_at: DateTime<Utc>) -> Result<usize> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let resolved = update(payment_failures::table)
            .filter(payment_failures::user_id.eq(user_id))
            .filter(payment_failures::resolved_at.is_null())
            .set(payment_failures::resolved_at.eq(resolved_at))
            .execute(&mut conn)?;

        Ok(resolved)
    }
}
