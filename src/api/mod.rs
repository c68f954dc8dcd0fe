pub mod middleware;
pub mod sessions;

pub use sessions::{session_routes, AppState};
