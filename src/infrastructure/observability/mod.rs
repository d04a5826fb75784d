pub mod health;
pub mod metrics;
pub mod reporter;

pub use health::{HealthIndicator, HealthStatus};
pub use metrics::Metrics;
pub use reporter::MetricsReporter;
