//! Generic CRUD collections with a shared read cache.
//!
//! Every resource implements [`Collection`]; wrapping it in
//! [`CachedCollection`] adds the caching policy used uniformly across
//! resources: reads go through the [`QueryCache`], writes refresh the
//! detail entry and invalidate list results.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::db::query::ListParams;
use crate::db::Page;

use super::cache::{CacheKey, Operation, QueryCache};
use super::error::{ServiceError, ServiceResult};

#[async_trait]
pub trait Collection: Send + Sync {
    type Doc: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Create: Send + 'static;
    type Update: Send + 'static;

    /// Resource name, used as the cache namespace
    const RESOURCE: &'static str;

    fn id_of(doc: &Self::Doc) -> &str;

    async fn list(&self, params: &ListParams) -> ServiceResult<Page<Self::Doc>>;

    async fn get(&self, id: &str) -> ServiceResult<Option<Self::Doc>>;

    async fn create(&self, input: Self::Create) -> ServiceResult<Self::Doc>;

    async fn update(&self, id: &str, patch: Self::Update) -> ServiceResult<Self::Doc>;

    async fn delete(&self, id: &str) -> ServiceResult<()>;
}

/// A [`Collection`] whose reads are served from the shared cache
pub struct CachedCollection<C: Collection> {
    inner: C,
    cache: Arc<QueryCache>,
}

impl<C: Collection> CachedCollection<C> {
    pub fn new(inner: C, cache: Arc<QueryCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub async fn list(&self, params: &ListParams) -> ServiceResult<Page<C::Doc>> {
        let key = CacheKey::list(C::RESOURCE, params);
        let cached = self.cache.get::<Page<C::Doc>>(&key);
        if let Some(hit) = &cached {
            if hit.fresh {
                return Ok(hit.value.clone());
            }
        }

        match self.inner.list(params).await {
            Ok(page) => {
                self.cache.set_with_params(key, Some(params.clone()), &page);
                Ok(page)
            }
            Err(ServiceError::Database(e)) if cached.is_some() => {
                tracing::warn!(resource = C::RESOURCE, error = %e, "Serving stale list after fetch failure");
                Ok(cached.map(|hit| hit.value).unwrap_or_else(|| Page::new(Vec::new(), 0, 1, 1)))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: &str) -> ServiceResult<Option<C::Doc>> {
        let key = CacheKey::detail(C::RESOURCE, id);
        let cached = self.cache.get::<C::Doc>(&key);
        if let Some(hit) = &cached {
            if hit.fresh {
                return Ok(Some(hit.value.clone()));
            }
        }

        match self.inner.get(id).await {
            Ok(Some(doc)) => {
                self.cache.set(key, &doc);
                Ok(Some(doc))
            }
            Ok(None) => {
                self.cache.evict(&key);
                Ok(None)
            }
            Err(ServiceError::Database(e)) if cached.is_some() => {
                tracing::warn!(resource = C::RESOURCE, id = id, error = %e, "Serving stale document after fetch failure");
                Ok(cached.map(|hit| hit.value))
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a document or fail with `NotFound`
    pub async fn require(&self, id: &str) -> ServiceResult<C::Doc> {
        self.get(id).await?.ok_or(ServiceError::NotFound(C::RESOURCE))
    }

    pub async fn create(&self, input: C::Create) -> ServiceResult<C::Doc> {
        let doc = self.inner.create(input).await?;

        self.cache.set(CacheKey::detail(C::RESOURCE, C::id_of(&doc)), &doc);
        if let Ok(json) = serde_json::to_value(&doc) {
            self.cache.update_lists(C::RESOURCE, |params, page| {
                if list_admits(params, &json) {
                    prepend_doc(page, &json);
                }
            });
        }
        self.cache.invalidate(C::RESOURCE, Operation::List);

        Ok(doc)
    }

    pub async fn update(&self, id: &str, patch: C::Update) -> ServiceResult<C::Doc> {
        let doc = self.inner.update(id, patch).await?;
        self.cache.set(CacheKey::detail(C::RESOURCE, id), &doc);
        self.cache.invalidate(C::RESOURCE, Operation::List);
        Ok(doc)
    }

    pub async fn delete(&self, id: &str) -> ServiceResult<()> {
        self.inner.delete(id).await?;
        self.cache.evict(&CacheKey::detail(C::RESOURCE, id));
        self.cache.invalidate(C::RESOURCE, Operation::List);
        Ok(())
    }

    /// Forget cached state after a write that bypassed this collection
    pub fn invalidate(&self, id: Option<&str>) {
        if let Some(id) = id {
            self.cache.evict(&CacheKey::detail(C::RESOURCE, id));
        }
        self.cache.invalidate(C::RESOURCE, Operation::List);
    }
}

/// Whether a new document belongs at the head of a list fetched with `params`
fn list_admits(params: Option<&ListParams>, doc: &Value) -> bool {
    let Some(params) = params else {
        return true;
    };
    if params.effective_page() != 1 {
        return false;
    }
    let Some(filter) = &params.filter else {
        return true;
    };
    filter.matches(&|field: &str| match doc.get(field)? {
        Value::String(s) => Some(s.clone()),
        // Booleans are stored as integers
        Value::Bool(b) => Some(String::from(if *b { "1" } else { "0" })),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Insert a document at the head of a cached page's `docs`
fn prepend_doc(page: &mut Value, doc: &Value) {
    if let Some(docs) = page.get_mut("docs").and_then(Value::as_array_mut) {
        docs.insert(0, doc.clone());
    }
    if let Some(total) = page.get_mut("total_docs") {
        if let Some(n) = total.as_i64() {
            *total = Value::from(n + 1);
        }
    }
}
