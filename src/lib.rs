pub mod analysis;
pub mod clock;
pub mod commands;
pub mod error;
pub mod keys;
pub mod models;
pub mod routes;
pub mod state;

pub use error::{PodwatchError, Result};
pub use routes::router;
pub use state::AppState;
