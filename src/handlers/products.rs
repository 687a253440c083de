//! Product CRUD endpoints under `/api/v1/products`.
//!
//! Every route takes [`CurrentUser`] first, so checks run in a fixed order:
//! authentication, then role, then record lookup, then the request body.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use tracing::{instrument, warn};

use crate::auth::require_admin;
use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::models::{Product, ProductEnvelope, ProductListResponse, ProductParams, ProductResponse};
use crate::pagination::{PageQuery, Pagination};
use crate::state::AppState;

const MISSING_PRODUCT_PARAM: &str = "param is missing or the value is empty: product";

/// Parse a path id; anything that is not an integer is an unknown record.
fn parse_id(raw: &str) -> AppResult<i64> {
    raw.parse().map_err(|_| AppError::product_not_found(raw))
}

/// Unwrap `{"product": {...}}`, rejecting an absent or empty object.
fn product_params(body: Result<Json<ProductEnvelope>, JsonRejection>) -> AppResult<ProductParams> {
    let Json(envelope) = body?;
    envelope
        .product
        .filter(|params| *params != ProductParams::default())
        .ok_or_else(|| AppError::BadRequest(MISSING_PRODUCT_PARAM.to_string()))
}

/// List products, one page at a time.
#[instrument(skip(state, current), fields(user_id = current.user.id))]
pub async fn list_products(
    current: CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<ProductListResponse>> {
    let page = Pagination::from_query(&query);
    Ok(Json(state.products.list(page).await?))
}

/// Get a single product.
#[instrument(skip(state, current), fields(user_id = current.user.id))]
pub async fn get_product(
    current: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ProductResponse>> {
    let product = state.products.find(parse_id(&id)?).await?;
    let product = state.products.show(product).await?;
    Ok(Json(ProductResponse { product }))
}

/// Create a product (admin only).
#[instrument(skip(state, current, body), fields(user_id = current.user.id))]
pub async fn create_product(
    current: CurrentUser,
    State(state): State<AppState>,
    body: Result<Json<ProductEnvelope>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ProductResponse>)> {
    require_admin(&current.user)?;
    let params = product_params(body)?;

    let outcome = state.products.create(params, Some(&current.user)).await;
    match outcome.product {
        Some(product) => Ok((StatusCode::CREATED, Json(ProductResponse { product }))),
        None => {
            warn!(errors = ?outcome.errors, "Product creation rejected");
            Err(AppError::Validation(outcome.errors))
        }
    }
}

/// Update a product (admin only). Serves both `PUT` and `PATCH`.
#[instrument(skip(state, current, body), fields(user_id = current.user.id))]
pub async fn update_product(
    current: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ProductEnvelope>, JsonRejection>,
) -> AppResult<Json<ProductResponse>> {
    require_admin(&current.user)?;
    let existing: Product = state.products.find(parse_id(&id)?).await?;
    let params = product_params(body)?;

    let product = state.products.update(existing, params).await?;
    Ok(Json(ProductResponse { product }))
}

/// Delete a product (admin only).
#[instrument(skip(state, current), fields(user_id = current.user.id))]
pub async fn delete_product(
    current: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    require_admin(&current.user)?;
    let product = state.products.find(parse_id(&id)?).await?;

    state.products.delete(product.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        let err = parse_id("abc").unwrap_err();
        assert!(matches!(err, AppError::NotFound(msg) if msg == "Couldn't find Product with 'id'=abc"));
        assert!(parse_id("").is_err());
        assert!(parse_id("1.5").is_err());
    }

    #[test]
    fn test_product_params_requires_envelope() {
        let missing = product_params(Ok(Json(ProductEnvelope { product: None }))).unwrap_err();
        assert!(matches!(missing, AppError::BadRequest(msg) if msg == MISSING_PRODUCT_PARAM));

        let empty = product_params(Ok(Json(ProductEnvelope {
            product: Some(ProductParams::default()),
        })))
        .unwrap_err();
        assert!(matches!(empty, AppError::BadRequest(_)));

        let params = ProductParams {
            name: Some(serde_json::Value::from("Widget")),
            ..ProductParams::default()
        };
        let ok = product_params(Ok(Json(ProductEnvelope {
            product: Some(params.clone()),
        })))
        .unwrap();
        assert_eq!(ok, params);
    }
}
