use super::{ApiError, AppState};
use crate::customers::{CustomerSearchInput, CustomerSearchResponse};
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;

/// Raw query string of `GET /api/customers`. Everything arrives as text and
/// is cleaned up by [`CustomerQueryParams::into_input`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerQueryParams {
    pub name: Option<String>,
    pub customer_number: Option<String>,
    pub phone: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl CustomerQueryParams {
    pub fn into_input(self) -> CustomerSearchInput {
        CustomerSearchInput {
            name: parse_string(self.name),
            customer_number: parse_string(self.customer_number),
            phone: parse_string(self.phone),
            page: parse_number(self.page),
            page_size: parse_number(self.page_size),
        }
    }
}

/// Trimmed; blank → absent.
fn parse_string(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Blank or unparsable → absent.
fn parse_number(value: Option<String>) -> Option<f64> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
}

/// GET /api/customers
///
/// Query parameters: `name` (substring), `customerNumber`, `phone` (exact),
/// `page`, `pageSize`.
pub(super) async fn search_customers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CustomerQueryParams>,
) -> Result<Json<CustomerSearchResponse>, ApiError> {
    let response = state.search.search_customers(params.into_input()).await?;
    Ok(Json(response))
}
