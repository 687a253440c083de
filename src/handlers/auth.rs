//! Account endpoints: `POST /signup`, `POST /login`, `DELETE /logout`.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, header};
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::models::{
    AccountResponse, Credentials, MessageResponse, SignupParams, UserEnvelope, UserResponse,
};
use crate::state::AppState;

/// Register a new account with the `user` role.
#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    body: Result<Json<UserEnvelope<SignupParams>>, JsonRejection>,
) -> AppResult<Json<AccountResponse>> {
    let Json(envelope) = body?;
    // A missing `user` object fails validation like blank fields do
    let user = state
        .accounts
        .signup(envelope.user.unwrap_or_default())
        .await?;

    Ok(Json(AccountResponse {
        message: "Signed up successfully.".to_string(),
        data: UserResponse::from(&user),
    }))
}

/// Exchange credentials for a bearer token, returned in the
/// `Authorization` response header.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<UserEnvelope<Credentials>>, JsonRejection>,
) -> AppResult<(HeaderMap, Json<AccountResponse>)> {
    let Json(envelope) = body?;
    let (user, issued) = state
        .accounts
        .login(envelope.user.unwrap_or_default())
        .await?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", issued.token))
        .map_err(|e| AppError::Internal(format!("Unencodable token header: {e}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, bearer);

    Ok((
        headers,
        Json(AccountResponse {
            message: "Logged in successfully.".to_string(),
            data: UserResponse::from(&user),
        }),
    ))
}

/// Revoke the token this request was made with.
#[instrument(skip_all, fields(user_id = current.user.id))]
pub async fn logout(
    current: CurrentUser,
    State(state): State<AppState>,
) -> AppResult<Json<MessageResponse>> {
    state.accounts.logout(&current).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully.".to_string(),
    }))
}
