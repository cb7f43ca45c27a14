pub mod auth;
pub mod dashboard;
pub mod games;
pub mod jwt;
pub mod middleware;
pub mod players;
pub mod rate_limit;
pub mod server;
pub mod stats;

pub use server::{AppState, build_router, run_api_server};
