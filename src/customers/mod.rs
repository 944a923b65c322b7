//! Customer search over the ERP customer and order-head tables.

pub mod repository;
pub mod service;

pub use repository::{
    parse_recent_orders, CustomerRepository, CustomerSearchCriteria, CustomerSearchResult,
    CustomerSummary, RecentOrder,
};
pub use service::{
    CustomerSearch, CustomerSearchInput, CustomerSearchResponse, CustomerService, Pagination,
};
