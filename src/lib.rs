pub mod artifacts;
pub mod auth;
pub mod clock;
pub mod config;
pub mod extractors;
pub mod logging;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod workers;
pub mod wrapped;
