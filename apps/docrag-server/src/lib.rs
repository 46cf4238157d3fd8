pub mod http_api;
pub mod request;
pub mod state;
pub mod upload;

pub use http_api::router;
pub use state::AppState;
