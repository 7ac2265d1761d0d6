// S3 Gateway - thin HTTP front-end over S3 object storage

pub mod config;
pub mod middleware;
pub mod models;
pub mod presign;
pub mod routes;
pub mod storage;
pub mod transfer;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
