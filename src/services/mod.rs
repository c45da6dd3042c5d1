//! Domain services sitting between the HTTP layer and the database.

pub mod analytics;
pub mod cache;
pub mod cart;
pub mod checkout;
pub mod collection;
mod error;
pub mod maintenance;
mod menu_items;
mod orders;
mod restaurants;

pub use analytics::{AnalyticsScope, AnalyticsService};
pub use cache::{CacheKey, Operation, QueryCache};
pub use cart::{AddItemRequest, CartService, ItemRef, UpdateItemRequest};
pub use checkout::{create_order_from_cart, CheckoutRequest};
pub use collection::{CachedCollection, Collection};
pub use error::{ServiceError, ServiceResult};
pub use maintenance::{spawn_maintenance_task, Maintenance};
pub use menu_items::MenuItems;
pub use orders::Orders;
pub use restaurants::{generate_slug, Restaurants};
