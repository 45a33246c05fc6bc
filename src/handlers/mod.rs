pub mod health;
pub mod route;
pub mod status;

pub use health::{health_handler, ready_handler};
pub use route::route_handler;
pub use status::status_handler;
