use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::query::{find_page, ListParams};
use crate::db::{
    now_timestamp, CreateRestaurantRequest, Page, Restaurant, UpdateRestaurantRequest,
    RESTAURANT_FIELDS,
};

use super::collection::Collection;
use super::error::{ServiceError, ServiceResult};

/// Generate a URL-safe slug from a restaurant name
pub fn generate_slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn validate_name(name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::validation("name", "Restaurant name is required"));
    }
    if name.len() > 100 {
        return Err(ServiceError::validation(
            "name",
            "Restaurant name must be at most 100 characters",
        ));
    }
    Ok(())
}

fn validate_slug(slug: &str) -> ServiceResult<()> {
    if slug.is_empty() {
        return Err(ServiceError::validation("slug", "Slug must not be empty"));
    }
    if !slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(ServiceError::validation(
            "slug",
            "Slug may only contain lowercase letters, digits and hyphens",
        ));
    }
    Ok(())
}

fn validate_currency(code: &str) -> ServiceResult<()> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ServiceError::validation(
            "currency_code",
            "Currency code must be three uppercase letters",
        ));
    }
    Ok(())
}

fn slug_conflict(e: sqlx::Error, slug: &str) -> ServiceError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            ServiceError::Conflict(format!("A restaurant with slug '{}' already exists", slug))
        }
        _ => ServiceError::Database(e),
    }
}

pub struct Restaurants {
    db: SqlitePool,
}

impl Restaurants {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn fetch(&self, id: &str) -> ServiceResult<Option<Restaurant>> {
        let restaurant = sqlx::query_as::<_, Restaurant>("SELECT * FROM restaurants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(restaurant)
    }
}

#[async_trait]
impl Collection for Restaurants {
    type Doc = Restaurant;
    type Create = CreateRestaurantRequest;
    type Update = UpdateRestaurantRequest;
    const RESOURCE: &'static str = "restaurants";

    fn id_of(doc: &Restaurant) -> &str {
        &doc.id
    }

    async fn list(&self, params: &ListParams) -> ServiceResult<Page<Restaurant>> {
        Ok(find_page(&self.db, "restaurants", RESTAURANT_FIELDS, params).await?)
    }

    async fn get(&self, id: &str) -> ServiceResult<Option<Restaurant>> {
        self.fetch(id).await
    }

    async fn create(&self, req: CreateRestaurantRequest) -> ServiceResult<Restaurant> {
        validate_name(&req.name)?;
        let slug = match req.slug {
            Some(slug) => {
                validate_slug(&slug)?;
                slug
            }
            None => {
                let slug = generate_slug(&req.name);
                if slug.is_empty() {
                    return Err(ServiceError::validation("slug", "Cannot derive a slug from the name"));
                }
                slug
            }
        };
        let currency_code = req.currency_code.unwrap_or_else(|| "USD".to_string());
        validate_currency(&currency_code)?;

        let now = now_timestamp();
        let restaurant = Restaurant {
            id: uuid::Uuid::new_v4().to_string(),
            name: req.name.trim().to_string(),
            slug,
            address: req.address,
            phone: req.phone,
            currency_code,
            is_active: true,
            created_by: req.created_by,
            created_at: now.clone(),
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO restaurants (id, name, slug, address, phone, currency_code, is_active, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&restaurant.id)
        .bind(&restaurant.name)
        .bind(&restaurant.slug)
        .bind(&restaurant.address)
        .bind(&restaurant.phone)
        .bind(&restaurant.currency_code)
        .bind(restaurant.is_active)
        .bind(&restaurant.created_by)
        .bind(&restaurant.created_at)
        .bind(&restaurant.updated_at)
        .execute(&self.db)
        .await
        .map_err(|e| slug_conflict(e, &restaurant.slug))?;

        tracing::info!(restaurant_id = %restaurant.id, slug = %restaurant.slug, "Restaurant created");
        Ok(restaurant)
    }

    async fn update(&self, id: &str, req: UpdateRestaurantRequest) -> ServiceResult<Restaurant> {
        let mut restaurant = self
            .fetch(id)
            .await?
            .ok_or(ServiceError::NotFound("restaurant"))?;

        if let Some(name) = req.name {
            validate_name(&name)?;
            restaurant.name = name.trim().to_string();
        }
        if let Some(slug) = req.slug {
            validate_slug(&slug)?;
            restaurant.slug = slug;
        }
        if let Some(code) = req.currency_code {
            validate_currency(&code)?;
            restaurant.currency_code = code;
        }
        if req.address.is_some() {
            restaurant.address = req.address;
        }
        if req.phone.is_some() {
            restaurant.phone = req.phone;
        }
        if let Some(active) = req.is_active {
            restaurant.is_active = active;
        }
        restaurant.updated_at = now_timestamp();

        sqlx::query(
            r#"
            UPDATE restaurants
            SET name = ?, slug = ?, address = ?, phone = ?, currency_code = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&restaurant.name)
        .bind(&restaurant.slug)
        .bind(&restaurant.address)
        .bind(&restaurant.phone)
        .bind(&restaurant.currency_code)
        .bind(restaurant.is_active)
        .bind(&restaurant.updated_at)
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(|e| slug_conflict(e, &restaurant.slug))?;

        tracing::info!(restaurant_id = %id, "Restaurant updated");
        Ok(restaurant)
    }

    async fn delete(&self, id: &str) -> ServiceResult<()> {
        let result = sqlx::query("DELETE FROM restaurants WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("restaurant"));
        }
        tracing::info!(restaurant_id = %id, "Restaurant deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> CreateRestaurantRequest {
        CreateRestaurantRequest {
            name: name.to_string(),
            slug: None,
            address: None,
            phone: None,
            currency_code: None,
            created_by: None,
        }
    }

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Trattoria da Mario"), "trattoria-da-mario");
        assert_eq!(generate_slug("  Sushi & Co.  "), "sushi-co");
        assert_eq!(generate_slug("Café_Nord"), "café-nord");
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let pool = crate::db::init_memory().await.unwrap();
        let restaurants = Restaurants::new(pool);

        let created = restaurants.create(request("Blue Door")).await.unwrap();
        assert_eq!(created.slug, "blue-door");
        assert_eq!(created.currency_code, "USD");
        assert!(created.is_active);

        let updated = restaurants
            .update(
                &created.id,
                UpdateRestaurantRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(restaurants.get(&created.id).await.unwrap(), Some(updated));

        restaurants.delete(&created.id).await.unwrap();
        assert!(restaurants.get(&created.id).await.unwrap().is_none());
        assert!(matches!(
            restaurants.delete(&created.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_slug_conflicts() {
        let pool = crate::db::init_memory().await.unwrap();
        let restaurants = Restaurants::new(pool);

        restaurants.create(request("Blue Door")).await.unwrap();
        assert!(matches!(
            restaurants.create(request("Blue  Door")).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let pool = crate::db::init_memory().await.unwrap();
        let restaurants = Restaurants::new(pool);

        assert!(matches!(
            restaurants.create(request("   ")).await,
            Err(ServiceError::Validation { .. })
        ));

        let mut bad_currency = request("Blue Door");
        bad_currency.currency_code = Some("usd".to_string());
        assert!(matches!(
            restaurants.create(bad_currency).await,
            Err(ServiceError::Validation { field, .. }) if field == "currency_code"
        ));
    }
}
