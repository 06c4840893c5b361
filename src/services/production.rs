use crate::{
    entities::{
        order_item, production_job, production_step, OrderItem, ProductionJob,
        ProductionJobModel, ProductionJobStatus, ProductionStep, ProductionStepModel,
        ProductionStepStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{DecorationMethod, DecorationSelection},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Fulfillment work orders generated from paid orders. A job is created
/// exactly once per order, inside the same transaction that marks the
/// order paid, and its steps are what downstream production tooling works
/// through.
#[derive(Clone)]
pub struct ProductionService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
}

#[derive(Debug, Clone)]
pub struct JobDetails {
    pub job: ProductionJobModel,
    pub steps: Vec<ProductionStepModel>,
}

impl ProductionService {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender) -> Self {
        Self { db, events }
    }

    /// Creates the job and its ordered steps for an order. Runs on the
    /// caller's connection so checkout can include it in the payment
    /// transaction. Returns the existing job when one is already present;
    /// the unique `order_id` column backstops the check under races.
    #[instrument(skip(self, conn))]
    pub async fn create_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<ProductionJobModel, ServiceError> {
        if let Some(existing) = ProductionJob::find()
            .filter(production_job::Column::OrderId.eq(order_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "order {order_id} has no items to produce"
            )));
        }

        let now = Utc::now();
        let job = production_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(ProductionJobStatus::Pending),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        for (sequence, name) in step_plan(&items).into_iter().enumerate() {
            production_step::ActiveModel {
                id: Set(Uuid::new_v4()),
                job_id: Set(job.id),
                sequence: Set(sequence as i32 + 1),
                name: Set(name),
                status: Set(ProductionStepStatus::Pending),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await?;
        }

        info!(%order_id, job_id = %job.id, "created production job");
        Ok(job)
    }

    #[instrument(skip(self))]
    pub async fn get_job_for_order(&self, order_id: Uuid) -> Result<JobDetails, ServiceError> {
        let job = ProductionJob::find()
            .filter(production_job::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("production job for order {order_id}"))
            })?;

        let steps = ProductionStep::find()
            .filter(production_step::Column::JobId.eq(job.id))
            .order_by_asc(production_step::Column::Sequence)
            .all(&*self.db)
            .await?;

        Ok(JobDetails { job, steps })
    }

    /// Completes one step. The first completion moves the job to
    /// in-progress; completing the last step completes the job.
    #[instrument(skip(self))]
    pub async fn mark_step_complete(
        &self,
        job_id: Uuid,
        step_id: Uuid,
    ) -> Result<JobDetails, ServiceError> {
        let txn = self.db.begin().await?;

        let job = ProductionJob::find_by_id(job_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("production job {job_id}")))?;
        if job.status == ProductionJobStatus::Completed {
            return Err(ServiceError::InvalidOperation(format!(
                "production job {job_id} is already completed"
            )));
        }

        let step = ProductionStep::find_by_id(step_id)
            .one(&txn)
            .await?
            .filter(|s| s.job_id == job_id)
            .ok_or_else(|| ServiceError::NotFound(format!("production step {step_id}")))?;
        if step.status == ProductionStepStatus::Completed {
            return Err(ServiceError::InvalidOperation(format!(
                "production step {step_id} is already completed"
            )));
        }

        let now = Utc::now();
        let mut active: production_step::ActiveModel = step.into();
        active.status = Set(ProductionStepStatus::Completed);
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let steps = ProductionStep::find()
            .filter(production_step::Column::JobId.eq(job_id))
            .order_by_asc(production_step::Column::Sequence)
            .all(&txn)
            .await?;
        let all_done = steps
            .iter()
            .all(|s| s.status == ProductionStepStatus::Completed);

        let mut job_active: production_job::ActiveModel = job.into();
        job_active.status = Set(if all_done {
            ProductionJobStatus::Completed
        } else {
            ProductionJobStatus::InProgress
        });
        job_active.updated_at = Set(now);
        let job = job_active.update(&txn).await?;

        txn.commit().await?;

        self.events
            .send_or_log(Event::ProductionStepCompleted { job_id, step_id })
            .await;
        if all_done {
            info!(%job_id, "production job completed");
            self.events
                .send_or_log(Event::ProductionJobCompleted(job_id))
                .await;
        }

        Ok(JobDetails { job, steps })
    }
}

/// Ordered step names for an order: artwork review, one decoration step
/// per distinct method across the items, quality check, packing.
fn step_plan(items: &[order_item::Model]) -> Vec<String> {
    let mut methods: Vec<DecorationMethod> = Vec::new();
    for item in items {
        let selection = item
            .decoration
            .as_ref()
            .and_then(|v| serde_json::from_value::<DecorationSelection>(v.clone()).ok());
        if let Some(selection) = selection {
            if !methods.contains(&selection.method) {
                methods.push(selection.method);
            }
        }
    }

    let mut plan = vec!["artwork review".to_string()];
    for method in methods {
        plan.push(
            match method {
                DecorationMethod::ScreenPrint => "screen printing",
                DecorationMethod::Embroidery => "embroidery",
                DecorationMethod::Dtg => "dtg printing",
                DecorationMethod::HeatTransfer => "heat transfer",
            }
            .to_string(),
        );
    }
    plan.push("quality check".to_string());
    plan.push("packing".to_string());
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item_with(decoration: Option<serde_json::Value>) -> order_item::Model {
        order_item::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            sku: "TEE-BLK-L".into(),
            decoration,
            quantity: 10,
            unit_price: dec!(12.00),
            total_price: dec!(120.00),
            breakdown: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_step_plan_undecorated() {
        let plan = step_plan(&[item_with(None)]);
        assert_eq!(plan, vec!["artwork review", "quality check", "packing"]);
    }

    #[test]
    fn test_step_plan_dedupes_methods() {
        let screen = serde_json::json!({
            "method": "SCREEN_PRINT", "locations": 1, "colors": 2
        });
        let embroidery = serde_json::json!({
            "method": "EMBROIDERY", "locations": 1, "colors": 1
        });
        let plan = step_plan(&[
            item_with(Some(screen.clone())),
            item_with(Some(embroidery)),
            item_with(Some(screen)),
        ]);
        assert_eq!(
            plan,
            vec![
                "artwork review",
                "screen printing",
                "embroidery",
                "quality check",
                "packing"
            ]
        );
    }
}
