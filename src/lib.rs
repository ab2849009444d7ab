pub mod api;
pub mod database;
pub mod error;
pub mod extraction;
pub mod models;
pub mod utils;

pub use error::ExtractError;
