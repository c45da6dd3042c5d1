//! Dashboard statistics and daily revenue.
//!
//! Both reports scan the orders in scope and aggregate in memory.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};

use crate::access::is_admin;
use crate::config::AnalyticsConfig;
use crate::db::{
    format_timestamp, parse_json, parse_timestamp, round_money, OrderStatus, PaymentStatus, Pricing,
    User,
};

use super::error::{ServiceError, ServiceResult};

/// Which restaurants a report covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsScope {
    All,
    Restaurant(String),
}

/// Decide the report scope for a caller.
///
/// Administrators see everything or the restaurant they ask for. Everyone
/// else is limited to an assigned restaurant, defaulting to the first one.
pub fn resolve_scope(user: &User, requested: Option<&str>) -> ServiceResult<AnalyticsScope> {
    if is_admin(Some(user)) {
        return Ok(requested
            .map(|id| AnalyticsScope::Restaurant(id.to_string()))
            .unwrap_or(AnalyticsScope::All));
    }

    match requested {
        Some(id) if user.restaurants.iter().any(|r| r == id) => {
            Ok(AnalyticsScope::Restaurant(id.to_string()))
        }
        Some(id) => {
            tracing::warn!(user_id = %user.id, restaurant_id = %id, "Analytics requested for unassigned restaurant");
            Err(ServiceError::forbidden("Restaurant is not assigned to you"))
        }
        None => user
            .restaurants
            .first()
            .map(|id| AnalyticsScope::Restaurant(id.clone()))
            .ok_or_else(|| ServiceError::forbidden("No restaurant assigned")),
    }
}

/// The fields of an order the reports need
#[derive(Debug, Clone)]
pub struct OrderFigures {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OrderFigures {
    /// Completed orders, and paid orders that were not cancelled
    pub fn counts_as_revenue(&self) -> bool {
        match self.status {
            OrderStatus::Cancelled => false,
            OrderStatus::Completed => true,
            _ => self.payment_status == PaymentStatus::Paid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_orders: i64,
    pub total_revenue: Decimal,
    pub average_order_value: Decimal,
    pub orders_by_status: BTreeMap<String, i64>,
    pub today_orders: i64,
    pub today_revenue: Decimal,
    pub active_restaurants: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevenueBucket {
    /// `YYYY-MM-DD` in UTC
    pub date: String,
    pub revenue: Decimal,
    pub orders: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueReport {
    pub days: u32,
    pub total_revenue: Decimal,
    pub buckets: Vec<RevenueBucket>,
}

pub fn summarize(orders: &[OrderFigures], today: NaiveDate, active_restaurants: i64) -> DashboardStats {
    let mut orders_by_status = BTreeMap::new();
    let mut total_orders = 0;
    let mut revenue_orders = 0;
    let mut total_revenue = Decimal::ZERO;
    let mut today_orders = 0;
    let mut today_revenue = Decimal::ZERO;

    for order in orders {
        *orders_by_status.entry(order.status.to_string()).or_insert(0) += 1;
        let is_today = order.created_at.date_naive() == today;
        if is_today {
            today_orders += 1;
        }
        if order.status == OrderStatus::Cancelled {
            continue;
        }
        total_orders += 1;
        if !order.counts_as_revenue() {
            continue;
        }
        revenue_orders += 1;
        total_revenue += order.total;
        if is_today {
            today_revenue += order.total;
        }
    }

    let average_order_value = if revenue_orders == 0 {
        Decimal::ZERO
    } else {
        round_money(total_revenue / Decimal::from(revenue_orders))
    };

    DashboardStats {
        total_orders,
        total_revenue,
        average_order_value,
        orders_by_status,
        today_orders,
        today_revenue,
        active_restaurants,
    }
}

/// Bucket orders into `days` days ending `today`.
///
/// Every day in the window gets a bucket, including days without orders.
/// Counts cover non-cancelled orders; revenue covers only those that
/// [`OrderFigures::counts_as_revenue`].
pub fn bucket_revenue(orders: &[OrderFigures], today: NaiveDate, days: u32) -> Vec<RevenueBucket> {
    let start = today - Duration::days(i64::from(days) - 1);

    let mut sums: HashMap<NaiveDate, (Decimal, i64)> = HashMap::new();
    for order in orders {
        if order.status == OrderStatus::Cancelled {
            continue;
        }
        let date = order.created_at.date_naive();
        if date < start || date > today {
            continue;
        }
        let entry = sums.entry(date).or_insert((Decimal::ZERO, 0));
        if order.counts_as_revenue() {
            entry.0 += order.total;
        }
        entry.1 += 1;
    }

    (0..i64::from(days))
        .map(|offset| {
            let date = start + Duration::days(offset);
            let (revenue, orders) = sums.get(&date).copied().unwrap_or((Decimal::ZERO, 0));
            RevenueBucket {
                date: date.format("%Y-%m-%d").to_string(),
                revenue,
                orders,
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct AnalyticsService {
    db: SqlitePool,
    default_days: i64,
    max_days: i64,
}

impl AnalyticsService {
    pub fn new(db: SqlitePool, config: &AnalyticsConfig) -> Self {
        Self {
            db,
            default_days: config.default_days,
            max_days: config.max_days.max(1),
        }
    }

    pub fn clamp_days(&self, days: Option<i64>) -> u32 {
        // max_days is at least 1, so the clamp range is never empty
        days.unwrap_or(self.default_days).clamp(1, self.max_days) as u32
    }

    pub async fn dashboard_stats(&self, scope: &AnalyticsScope) -> ServiceResult<DashboardStats> {
        let orders = self.load_orders(scope, None).await?;

        let active_restaurants: i64 = match scope {
            AnalyticsScope::All => {
                sqlx::query_scalar("SELECT COUNT(*) FROM restaurants WHERE is_active = 1")
                    .fetch_one(&self.db)
                    .await?
            }
            AnalyticsScope::Restaurant(id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM restaurants WHERE is_active = 1 AND id = ?")
                    .bind(id)
                    .fetch_one(&self.db)
                    .await?
            }
        };

        Ok(summarize(&orders, Utc::now().date_naive(), active_restaurants))
    }

    pub async fn revenue(&self, scope: &AnalyticsScope, days: Option<i64>) -> ServiceResult<RevenueReport> {
        let days = self.clamp_days(days);
        let today = Utc::now().date_naive();
        let since = (today - Duration::days(i64::from(days) - 1))
            .and_hms_opt(0, 0, 0)
            .map(|start| format_timestamp(start.and_utc()));

        let orders = self.load_orders(scope, since.as_deref()).await?;
        let buckets = bucket_revenue(&orders, today, days);
        let total_revenue = buckets.iter().map(|b| b.revenue).sum();

        Ok(RevenueReport {
            days,
            total_revenue,
            buckets,
        })
    }

    async fn load_orders(
        &self,
        scope: &AnalyticsScope,
        since: Option<&str>,
    ) -> ServiceResult<Vec<OrderFigures>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut bindings: Vec<String> = Vec::new();

        if let AnalyticsScope::Restaurant(id) = scope {
            conditions.push("restaurant_id = ?");
            bindings.push(id.clone());
        }
        if let Some(since) = since {
            conditions.push("created_at >= ?");
            bindings.push(since.to_string());
        }

        let mut sql = "SELECT status, payment_status, pricing, created_at FROM orders".to_string();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let mut query = sqlx::query_as::<_, (String, String, String, String)>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }
        let rows = query.fetch_all(&self.db).await?;

        let mut figures = Vec::with_capacity(rows.len());
        for (status, payment_status, pricing, created_at) in rows {
            let status = status.parse::<OrderStatus>().map_err(|e| {
                ServiceError::Database(sqlx::Error::ColumnDecode {
                    index: "status".to_string(),
                    source: e.into(),
                })
            })?;
            let payment_status = payment_status.parse::<PaymentStatus>().map_err(|e| {
                ServiceError::Database(sqlx::Error::ColumnDecode {
                    index: "payment_status".to_string(),
                    source: e.into(),
                })
            })?;
            let pricing: Pricing = parse_json("pricing", &pricing)?;
            let Some(created_at) = parse_timestamp(&created_at) else {
                tracing::warn!(created_at = %created_at, "Skipping order with unparseable timestamp");
                continue;
            };
            figures.push(OrderFigures {
                status,
                payment_status,
                total: pricing.total,
                created_at,
            });
        }
        Ok(figures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Role, RoleRef, ADMINISTRATOR_ROLE};
    use chrono::TimeZone;

    fn user(admin: bool, restaurants: &[&str]) -> User {
        let roles = if admin {
            vec![RoleRef::Resolved(Role {
                id: "r-admin".to_string(),
                name: ADMINISTRATOR_ROLE.to_string(),
                description: None,
                permissions: Vec::new(),
            })]
        } else {
            Vec::new()
        };
        User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            name: "U1".to_string(),
            roles,
            restaurants: restaurants.iter().map(|s| s.to_string()).collect(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn figures(day: u32, total: i64, status: OrderStatus) -> OrderFigures {
        OrderFigures {
            status,
            payment_status: PaymentStatus::Pending,
            total: Decimal::from(total),
            created_at: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
        }
    }

    fn paid(mut order: OrderFigures) -> OrderFigures {
        order.payment_status = PaymentStatus::Paid;
        order
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn test_admin_scope() {
        let admin = user(true, &[]);
        assert_eq!(resolve_scope(&admin, None).unwrap(), AnalyticsScope::All);
        assert_eq!(
            resolve_scope(&admin, Some("x")).unwrap(),
            AnalyticsScope::Restaurant("x".to_string())
        );
    }

    #[test]
    fn test_non_admin_scope() {
        let staff = user(false, &["a", "b"]);
        assert_eq!(
            resolve_scope(&staff, None).unwrap(),
            AnalyticsScope::Restaurant("a".to_string())
        );
        assert_eq!(
            resolve_scope(&staff, Some("b")).unwrap(),
            AnalyticsScope::Restaurant("b".to_string())
        );
        assert!(matches!(
            resolve_scope(&staff, Some("c")),
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            resolve_scope(&user(false, &[]), None),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn test_buckets_are_zero_filled() {
        let orders = vec![
            figures(10, 20, OrderStatus::Completed),
            paid(figures(10, 5, OrderStatus::Pending)),
            paid(figures(8, 100, OrderStatus::Cancelled)),
            paid(figures(9, 7, OrderStatus::Ready)),
            figures(9, 3, OrderStatus::Preparing),
            figures(1, 999, OrderStatus::Completed),
        ];
        let buckets = bucket_revenue(&orders, date(10), 3);

        assert_eq!(
            buckets,
            vec![
                RevenueBucket {
                    date: "2026-03-08".to_string(),
                    revenue: Decimal::ZERO,
                    orders: 0,
                },
                RevenueBucket {
                    date: "2026-03-09".to_string(),
                    revenue: Decimal::from(7),
                    orders: 2,
                },
                RevenueBucket {
                    date: "2026-03-10".to_string(),
                    revenue: Decimal::from(25),
                    orders: 2,
                },
            ]
        );
    }

    #[test]
    fn test_summarize_excludes_cancelled_revenue() {
        let orders = vec![
            figures(10, 20, OrderStatus::Completed),
            paid(figures(10, 10, OrderStatus::Cancelled)),
            paid(figures(9, 10, OrderStatus::Pending)),
        ];
        let stats = summarize(&orders, date(10), 2);
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.total_revenue, Decimal::from(30));
        assert_eq!(stats.average_order_value, Decimal::from(15));
        assert_eq!(stats.today_orders, 2);
        assert_eq!(stats.today_revenue, Decimal::from(20));
        assert_eq!(stats.orders_by_status.get("cancelled"), Some(&1));
        assert_eq!(stats.active_restaurants, 2);
    }

    #[test]
    fn test_unpaid_orders_are_not_revenue() {
        let orders = vec![
            figures(10, 20, OrderStatus::Completed),
            figures(10, 40, OrderStatus::Pending),
            figures(9, 50, OrderStatus::Ready),
            paid(figures(9, 10, OrderStatus::Confirmed)),
        ];
        let stats = summarize(&orders, date(10), 1);
        assert_eq!(stats.total_orders, 4);
        assert_eq!(stats.total_revenue, Decimal::from(30));
        assert_eq!(stats.average_order_value, Decimal::from(15));
        assert_eq!(stats.today_orders, 2);
        assert_eq!(stats.today_revenue, Decimal::from(20));

        let buckets = bucket_revenue(&orders, date(10), 2);
        assert_eq!(buckets[0].revenue, Decimal::from(10));
        assert_eq!(buckets[0].orders, 2);
        assert_eq!(buckets[1].revenue, Decimal::from(20));
        assert_eq!(buckets[1].orders, 2);
    }

    #[tokio::test]
    async fn test_days_are_clamped() {
        let pool = crate::db::init_memory().await.unwrap();
        let analytics = AnalyticsService::new(pool, &AnalyticsConfig::default());
        assert_eq!(analytics.clamp_days(None), 30);
        assert_eq!(analytics.clamp_days(Some(0)), 1);
        assert_eq!(analytics.clamp_days(Some(10_000)), 365);

        let report = analytics.revenue(&AnalyticsScope::All, Some(7)).await.unwrap();
        assert_eq!(report.buckets.len(), 7);
        assert_eq!(report.total_revenue, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_reports_cover_checked_out_orders() {
        use crate::db::{CartOwner, CustomerInfo, OrderType, PaymentMethod};
        use crate::services::cart::tests::{add, fixture};
        use crate::services::checkout::{create_order_from_cart, CheckoutRequest};

        let f = fixture().await;
        let owner = CartOwner::Session("s".to_string());
        let cart = f.carts.get_or_create_cart(&f.restaurant, &owner).await.unwrap();
        f.carts.add_item(&cart.id, add(&f.menu[0], 2)).await.unwrap();
        create_order_from_cart(
            &f.pool,
            CheckoutRequest {
                cart_id: cart.id.clone(),
                customer: Some(CustomerInfo {
                    name: "Ada".to_string(),
                    email: None,
                    phone: Some("555-0100".to_string()),
                }),
                order_type: Some(OrderType::Takeaway),
                payment_method: Some(PaymentMethod::Cash),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let analytics = AnalyticsService::new(f.pool.clone(), &AnalyticsConfig::default());
        let scope = AnalyticsScope::Restaurant(f.restaurant.clone());

        // Nothing is earned until the order is paid
        let stats = analytics.dashboard_stats(&scope).await.unwrap();
        assert_eq!(stats.total_orders, 1);
        assert_eq!(stats.total_revenue, Decimal::ZERO);

        sqlx::query("UPDATE orders SET payment_status = 'paid'")
            .execute(&f.pool)
            .await
            .unwrap();

        let stats = analytics.dashboard_stats(&scope).await.unwrap();
        assert_eq!(stats.total_orders, 1);
        // 2 x 10 plus 10% tax
        assert_eq!(stats.total_revenue, Decimal::from(22));
        assert_eq!(stats.today_orders, 1);
        assert_eq!(stats.active_restaurants, 1);

        let report = analytics.revenue(&scope, None).await.unwrap();
        assert_eq!(report.buckets.len(), 30);
        assert_eq!(report.buckets.last().map(|b| b.orders), Some(1));
        assert_eq!(report.total_revenue, Decimal::from(22));

        let other = AnalyticsScope::Restaurant("elsewhere".to_string());
        assert_eq!(analytics.dashboard_stats(&other).await.unwrap().total_orders, 0);
    }
}
