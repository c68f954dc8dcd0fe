pub mod catalog;
pub mod scoring;
pub mod selection;
pub mod session;
pub mod session_manager;
pub mod spotify;

pub use catalog::{CatalogConnection, CatalogFactory};
pub use session::SessionHolder;
pub use session_manager::SessionManager;
pub use spotify::SpotifyClient;
