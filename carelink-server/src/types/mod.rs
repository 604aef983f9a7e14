//! Shared request/response types for the HTTP API.

pub mod pagination;

pub use pagination::PaginationParams;
