use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use crate::db::query::{find_page, ListParams};
use crate::db::{
    now_timestamp, round_money, CreateMenuItemRequest, MenuItem, Page, UpdateMenuItemRequest,
    MENU_ITEM_FIELDS,
};

use super::collection::Collection;
use super::error::{ServiceError, ServiceResult};

fn validate_price(price: Decimal) -> ServiceResult<Decimal> {
    if price.is_sign_negative() {
        return Err(ServiceError::validation("price", "Price must not be negative"));
    }
    Ok(round_money(price))
}

pub struct MenuItems {
    db: SqlitePool,
}

impl MenuItems {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn fetch(&self, id: &str) -> ServiceResult<Option<MenuItem>> {
        let item = sqlx::query_as::<_, MenuItem>("SELECT * FROM menu_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(item)
    }
}

#[async_trait]
impl Collection for MenuItems {
    type Doc = MenuItem;
    type Create = CreateMenuItemRequest;
    type Update = UpdateMenuItemRequest;
    const RESOURCE: &'static str = "menu-items";

    fn id_of(doc: &MenuItem) -> &str {
        &doc.id
    }

    async fn list(&self, params: &ListParams) -> ServiceResult<Page<MenuItem>> {
        Ok(find_page(&self.db, "menu_items", MENU_ITEM_FIELDS, params).await?)
    }

    async fn get(&self, id: &str) -> ServiceResult<Option<MenuItem>> {
        self.fetch(id).await
    }

    async fn create(&self, req: CreateMenuItemRequest) -> ServiceResult<MenuItem> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name", "Menu item name is required"));
        }
        let price = validate_price(req.price)?;

        let restaurant_exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM restaurants WHERE id = ?")
                .bind(&req.restaurant_id)
                .fetch_optional(&self.db)
                .await?;
        if restaurant_exists.is_none() {
            return Err(ServiceError::validation("restaurant_id", "Restaurant does not exist"));
        }

        let now = now_timestamp();
        let item = MenuItem {
            id: uuid::Uuid::new_v4().to_string(),
            restaurant_id: req.restaurant_id,
            name: req.name.trim().to_string(),
            description: req.description,
            price,
            category: req.category,
            is_available: req.is_available.unwrap_or(true),
            created_by: req.created_by,
            created_at: now.clone(),
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO menu_items (id, restaurant_id, name, description, price, category, is_available, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.restaurant_id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.price.to_string())
        .bind(&item.category)
        .bind(item.is_available)
        .bind(&item.created_by)
        .bind(&item.created_at)
        .bind(&item.updated_at)
        .execute(&self.db)
        .await?;

        tracing::info!(menu_item_id = %item.id, restaurant_id = %item.restaurant_id, "Menu item created");
        Ok(item)
    }

    async fn update(&self, id: &str, req: UpdateMenuItemRequest) -> ServiceResult<MenuItem> {
        let mut item = self
            .fetch(id)
            .await?
            .ok_or(ServiceError::NotFound("menu item"))?;

        if let Some(name) = req.name {
            if name.trim().is_empty() {
                return Err(ServiceError::validation("name", "Menu item name is required"));
            }
            item.name = name.trim().to_string();
        }
        if let Some(price) = req.price {
            item.price = validate_price(price)?;
        }
        if req.description.is_some() {
            item.description = req.description;
        }
        if req.category.is_some() {
            item.category = req.category;
        }
        if let Some(available) = req.is_available {
            item.is_available = available;
        }
        item.updated_at = now_timestamp();

        sqlx::query(
            r#"
            UPDATE menu_items
            SET name = ?, description = ?, price = ?, category = ?, is_available = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.price.to_string())
        .bind(&item.category)
        .bind(item.is_available)
        .bind(&item.updated_at)
        .bind(id)
        .execute(&self.db)
        .await?;

        tracing::info!(menu_item_id = %id, "Menu item updated");
        Ok(item)
    }

    async fn delete(&self, id: &str) -> ServiceResult<()> {
        let result = sqlx::query("DELETE FROM menu_items WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("menu item"));
        }
        tracing::info!(menu_item_id = %id, "Menu item deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::Where;
    use crate::db::CreateRestaurantRequest;
    use crate::services::Restaurants;

    async fn setup() -> (MenuItems, String) {
        let pool = crate::db::init_memory().await.unwrap();
        let restaurant = Restaurants::new(pool.clone())
            .create(CreateRestaurantRequest {
                name: "Blue Door".to_string(),
                slug: None,
                address: None,
                phone: None,
                currency_code: None,
                created_by: None,
            })
            .await
            .unwrap();
        (MenuItems::new(pool), restaurant.id)
    }

    fn request(restaurant_id: &str, name: &str, price: Decimal) -> CreateMenuItemRequest {
        CreateMenuItemRequest {
            restaurant_id: restaurant_id.to_string(),
            name: name.to_string(),
            description: None,
            price,
            category: Some("mains".to_string()),
            is_available: None,
            created_by: None,
        }
    }

    #[tokio::test]
    async fn test_price_round_trips_exactly() {
        let (items, restaurant_id) = setup().await;
        let created = items
            .create(request(&restaurant_id, "Risotto", Decimal::new(1250, 2)))
            .await
            .unwrap();

        let fetched = items.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.price, Decimal::new(1250, 2));
        assert!(fetched.is_available);
    }

    #[tokio::test]
    async fn test_rejects_negative_price_and_unknown_restaurant() {
        let (items, restaurant_id) = setup().await;
        assert!(matches!(
            items.create(request(&restaurant_id, "Soup", Decimal::new(-1, 0))).await,
            Err(ServiceError::Validation { field, .. }) if field == "price"
        ));
        assert!(matches!(
            items.create(request("missing", "Soup", Decimal::ONE)).await,
            Err(ServiceError::Validation { field, .. }) if field == "restaurant_id"
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_restaurant() {
        let (items, restaurant_id) = setup().await;
        items
            .create(request(&restaurant_id, "Risotto", Decimal::TEN))
            .await
            .unwrap();
        items
            .create(request(&restaurant_id, "Tiramisu", Decimal::new(6, 0)))
            .await
            .unwrap();

        let params = ListParams {
            sort: Some("name".to_string()),
            ..Default::default()
        }
        .with_filter(Where::equals("restaurant_id", restaurant_id.clone()));
        let page = items.list(&params).await.unwrap();
        assert_eq!(page.total_docs, 2);
        assert_eq!(page.docs[0].name, "Risotto");

        let other = ListParams::default().with_filter(Where::equals("restaurant_id", "nope"));
        assert_eq!(items.list(&other).await.unwrap().total_docs, 0);
    }
}
