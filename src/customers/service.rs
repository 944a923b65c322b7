use super::repository::{CustomerRepository, CustomerSearchCriteria, CustomerSummary};
use crate::error::DataError;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

const MIN_PAGE_SIZE: u64 = 1;
const MAX_PAGE_SIZE: u64 = 100;
const DEFAULT_PAGE_SIZE: u64 = 25;

/// Search request as it arrives from the HTTP layer. Page numbers are kept
/// as parsed floats and normalized here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomerSearchInput {
    pub name: Option<String>,
    pub customer_number: Option<String>,
    pub phone: Option<String>,
    pub page: Option<f64>,
    pub page_size: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    pub total_records: i64,
    pub total_pages: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CustomerSearchResponse {
    pub data: Vec<CustomerSummary>,
    pub pagination: Pagination,
}

/// Paged customer search, as consumed by the router.
#[async_trait]
pub trait CustomerSearch: Send + Sync {
    async fn search_customers(
        &self,
        input: CustomerSearchInput,
    ) -> Result<CustomerSearchResponse, DataError>;
}

pub struct CustomerService {
    repository: CustomerRepository,
}

impl CustomerService {
    pub fn new(repository: CustomerRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl CustomerSearch for CustomerService {
    async fn search_customers(
        &self,
        input: CustomerSearchInput,
    ) -> Result<CustomerSearchResponse, DataError> {
        let page = normalize_page(input.page);
        let page_size = normalize_page_size(input.page_size);

        let criteria = CustomerSearchCriteria {
            name: input.name,
            customer_number: input.customer_number,
            phone: input.phone,
            limit: page_size,
            offset: (page - 1).saturating_mul(page_size),
        };

        let result = self.repository.search(&criteria).await?;
        debug!(
            page,
            page_size,
            total = result.total,
            returned = result.customers.len(),
            "Customer search complete"
        );

        Ok(CustomerSearchResponse {
            data: result.customers,
            pagination: Pagination {
                page,
                page_size,
                total_records: result.total,
                total_pages: total_pages(result.total, page_size),
            },
        })
    }
}

/// Absent, NaN or below one → 1, otherwise floored.
pub fn normalize_page(page: Option<f64>) -> u64 {
    match page {
        Some(page) if page >= 1.0 => page.floor() as u64,
        _ => 1,
    }
}

/// Absent, NaN or zero → default, otherwise floored into `1..=100`.
pub fn normalize_page_size(page_size: Option<f64>) -> u64 {
    match page_size {
        Some(size) if !size.is_nan() && size != 0.0 => {
            if size < MIN_PAGE_SIZE as f64 {
                MIN_PAGE_SIZE
            } else {
                (size.floor() as u64).clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
            }
        }
        _ => DEFAULT_PAGE_SIZE,
    }
}

fn total_pages(total: i64, page_size: u64) -> u64 {
    if total <= 0 {
        return 0;
    }
    (total as u64).div_ceil(page_size)
}
