use async_trait::async_trait;
use sqlx::SqlitePool;
use std::convert::Infallible;

use crate::db::query::{find_page, ListParams};
use crate::db::{now_timestamp, Order, OrderRow, Page, UpdateOrderRequest, ORDER_FIELDS};

use super::collection::Collection;
use super::error::{ServiceError, ServiceResult};

/// Orders are created only by checkout, so `create` is uninhabited here
pub struct Orders {
    db: SqlitePool,
}

impl Orders {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn fetch(&self, id: &str) -> ServiceResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(Order::try_from).transpose()?)
    }

    /// Apply `req` to `order` as read and compare-and-swap it on its revision
    async fn save_update(&self, mut order: Order, req: UpdateOrderRequest) -> ServiceResult<Order> {
        if let Some(expected) = req.expected_revision {
            if expected != order.revision {
                return Err(ServiceError::Conflict(format!(
                    "Order is at revision {}, not {}",
                    order.revision, expected
                )));
            }
        }
        apply_update(&mut order, req)?;
        order.updated_at = now_timestamp();
        let read_revision = order.revision;
        order.revision += 1;

        let result = sqlx::query(
            "UPDATE orders SET status = ?, payment_status = ?, items = ?, revision = ?, updated_at = ? WHERE id = ? AND revision = ?",
        )
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(serde_json::to_string(&order.items)?)
        .bind(order.revision)
        .bind(&order.updated_at)
        .bind(&order.id)
        .bind(read_revision)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(order_id = %order.id, revision = read_revision, "Order changed concurrently");
            return Err(ServiceError::Conflict(
                "Order was modified concurrently, reload and retry".to_string(),
            ));
        }

        tracing::info!(
            order_id = %order.id,
            status = %order.status,
            payment_status = %order.payment_status,
            revision = order.revision,
            "Order updated"
        );
        Ok(order)
    }
}

/// Apply a status change request to an order in memory
fn apply_update(order: &mut Order, req: UpdateOrderRequest) -> ServiceResult<()> {
    if let Some(next) = req.status {
        if next != order.status {
            if !order.status.can_transition_to(next, order.order_type) {
                return Err(ServiceError::InvalidTransition(format!(
                    "Cannot move {} order from {} to {}",
                    order.order_type, order.status, next
                )));
            }
            order.status = next;
        }
    }

    if let Some(payment_status) = req.payment_status {
        order.payment_status = payment_status;
    }

    if let Some((index, next)) = req.kitchen {
        if order.status.is_terminal() {
            return Err(ServiceError::InvalidTransition(format!(
                "Order is already {}",
                order.status
            )));
        }
        let len = order.items.len();
        let item = order
            .items
            .get_mut(index)
            .ok_or(ServiceError::InvalidIndex { index, len })?;
        if !item.kitchen_status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot move item from {} to {}",
                item.kitchen_status, next
            )));
        }
        item.kitchen_status = next;
    }

    Ok(())
}

#[async_trait]
impl Collection for Orders {
    type Doc = Order;
    type Create = Infallible;
    type Update = UpdateOrderRequest;
    const RESOURCE: &'static str = "orders";

    fn id_of(doc: &Order) -> &str {
        &doc.id
    }

    async fn list(&self, params: &ListParams) -> ServiceResult<Page<Order>> {
        let page = find_page::<OrderRow>(&self.db, "orders", ORDER_FIELDS, params).await?;
        Ok(page.try_map(Order::try_from)?)
    }

    async fn get(&self, id: &str) -> ServiceResult<Option<Order>> {
        self.fetch(id).await
    }

    async fn create(&self, input: Infallible) -> ServiceResult<Order> {
        match input {}
    }

    async fn update(&self, id: &str, req: UpdateOrderRequest) -> ServiceResult<Order> {
        let order = self.fetch(id).await?.ok_or(ServiceError::NotFound("order"))?;
        self.save_update(order, req).await
    }

    async fn delete(&self, id: &str) -> ServiceResult<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("order"));
        }
        tracing::info!(order_id = %id, "Order deleted");
        Ok(())
    }
}
