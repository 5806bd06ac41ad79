//! Shared helpers

pub mod error;
pub mod filters;
pub mod requests;
pub mod stac;

pub use error::{AppError, AppResult, ErrorResponse, StacError};
