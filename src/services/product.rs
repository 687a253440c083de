use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::cache::{ResponseCache, collection_key, record_key};
use crate::config::RuntimeEnv;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Product, ProductListResponse, ProductParams, User};
use crate::pagination::Pagination;
use crate::repository::ProductRepository;
use crate::validation::validate_product;

/// Generic message reported when creation fails for a reason the caller
/// cannot act on. The detail is logged instead.
pub const UNEXPECTED_CREATE_ERROR: &str = "An unexpected error occurred while creating the product";

/// Result of the creation pipeline.
///
/// Exactly one of `product` and a non-empty `errors` is set.
#[derive(Debug, Clone, Default)]
pub struct CreateOutcome {
    pub product: Option<Product>,
    pub errors: Vec<String>,
}

impl CreateOutcome {
    fn failed(errors: Vec<String>) -> Self {
        Self {
            product: None,
            errors,
        }
    }

    pub fn is_success(&self) -> bool {
        self.product.is_some()
    }
}

/// Product reads through the response cache and writes that invalidate it.
#[derive(Clone)]
pub struct ProductService {
    repo: Arc<dyn ProductRepository>,
    cache: ResponseCache,
    environment: RuntimeEnv,
}

impl ProductService {
    pub fn new(repo: Arc<dyn ProductRepository>, cache: ResponseCache, environment: RuntimeEnv) -> Self {
        Self {
            repo,
            cache,
            environment,
        }
    }

    /// One page of products, ordered by id, with navigation metadata.
    ///
    /// The page itself is served from the cache; the total used for the
    /// metadata is always counted fresh.
    #[instrument(skip(self))]
    pub async fn list(&self, page: Pagination) -> AppResult<ProductListResponse> {
        let state = self.repo.collection_state().await?;
        let key = collection_key(&state, &page);

        let products: Vec<Product> = self
            .cache
            .fetch("collection", &key, || {
                self.repo.page(page.offset(), page.per_page)
            })
            .await?;

        let total_count = self.repo.count().await?;
        Ok(ProductListResponse {
            products,
            meta: page.meta(total_count),
        })
    }

    /// Load a product or fail with 404.
    pub async fn find(&self, id: i64) -> AppResult<Product> {
        self.repo
            .find(id)
            .await?
            .ok_or_else(|| AppError::product_not_found(id))
    }

    /// A product as served to clients, cached under its versioned record key.
    #[instrument(skip(self, product), fields(id = product.id))]
    pub async fn show(&self, product: Product) -> AppResult<Product> {
        let key = record_key(&product);
        self.cache
            .fetch("record", &key, || async move { Ok(product) })
            .await
    }

    /// Validate and persist a new product.
    ///
    /// Never fails outright: every problem ends up in
    /// [`CreateOutcome::errors`].
    #[instrument(skip(self, params, actor))]
    pub async fn create(&self, params: ProductParams, actor: Option<&User>) -> CreateOutcome {
        let attributes = match validate_product(&params) {
            Ok(attributes) => attributes,
            Err(errors) => return CreateOutcome::failed(errors),
        };

        let product = match self.repo.insert(attributes).await {
            Ok(product) => product,
            Err(AppError::Validation(errors)) => return CreateOutcome::failed(errors),
            Err(e) => {
                error!(error = %e, "Product creation failed");
                return CreateOutcome::failed(vec![UNEXPECTED_CREATE_ERROR.to_string()]);
            }
        };

        self.after_write(product.id, "create").await;
        if self.environment.is_production() {
            self.notify_creation(&product, actor);
        }
        info!(
            "Product created: ID={}, Name={}, By={}",
            product.id,
            product.name,
            actor.map_or("system", |user| user.email.as_str())
        );

        CreateOutcome {
            product: Some(product),
            errors: Vec::new(),
        }
    }

    /// Apply a partial update to `existing`.
    ///
    /// Absent fields keep their stored values and the merged result is
    /// validated with the same rules as creation.
    #[instrument(skip(self, existing, params), fields(id = existing.id))]
    pub async fn update(&self, existing: Product, params: ProductParams) -> AppResult<Product> {
        let merged = params.merged_onto(&existing);
        let attributes = validate_product(&merged).map_err(AppError::Validation)?;

        let product = self.repo.update(existing.id, attributes).await?;
        self.after_write(product.id, "update").await;
        Ok(product)
    }

    /// Delete a product. Fails with 404 when it is already gone.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> AppResult<()> {
        if !self.repo.delete(id).await? {
            return Err(AppError::product_not_found(id));
        }
        self.after_write(id, "delete").await;
        Ok(())
    }

    async fn after_write(&self, id: i64, operation: &'static str) {
        metrics::record_product_written(operation);
        self.cache.invalidate_product(id).await;
    }

    /// Creation notification hook. Delivery channels (mail, webhooks) are not
    /// wired up; the event is only logged.
    fn notify_creation(&self, product: &Product, actor: Option<&User>) {
        info!(
            target: "notifications",
            product_id = product.id,
            product_name = %product.name,
            actor = actor.map_or("system", |user| user.email.as_str()),
            "Product created notification"
        );
    }
}
