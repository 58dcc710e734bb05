pub mod assistant;
pub mod generate;
pub mod health;
pub mod materialize;
pub mod metrics;
pub mod validate;

pub use assistant::forward_to_assistant;
pub use generate::{generate_download, generate_inline};
pub use health::{health_check, readiness_check};
pub use metrics::metrics_endpoint;
pub use validate::validate_schema;
