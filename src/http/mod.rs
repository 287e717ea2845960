//! HTTP boundary: the `/browse/node` CRUD surface and `/maintenance/...`
//! operational endpoints, built on the same axum stack the realtime server
//! uses elsewhere in this codebase.

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::{AppState, AppStateInner};
