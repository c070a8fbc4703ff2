pub mod admin;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod matching;
pub mod metrics;
pub mod rules;
pub mod schema;
pub mod streaming;
pub mod validation;
pub mod world;

pub use error::{RpcError, Violation};
pub use world::AppState;
