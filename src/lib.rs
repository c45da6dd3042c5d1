pub mod access;
pub mod api;
pub mod config;
pub mod db;
pub mod services;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::{
    AnalyticsService, CachedCollection, CartService, MenuItems, Orders, QueryCache, Restaurants,
};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub cache: Arc<QueryCache>,
    pub carts: CartService,
    pub restaurants: CachedCollection<Restaurants>,
    pub menu_items: CachedCollection<MenuItems>,
    pub orders: CachedCollection<Orders>,
    pub analytics: AnalyticsService,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let cache = Arc::new(QueryCache::from_config(&config.cache));
        Self {
            carts: CartService::from_config(db.clone(), &config.cart),
            restaurants: CachedCollection::new(Restaurants::new(db.clone()), cache.clone()),
            menu_items: CachedCollection::new(MenuItems::new(db.clone()), cache.clone()),
            orders: CachedCollection::new(Orders::new(db.clone()), cache.clone()),
            analytics: AnalyticsService::new(db.clone(), &config.analytics),
            cache,
            config,
            db,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
