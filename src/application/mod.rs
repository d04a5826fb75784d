pub mod execution;
pub mod lifecycle;
pub mod orchestrator;
pub mod risk_engine;
pub mod routing;
pub mod system;

pub use execution::{ExecutionEngine, ExecutionResult, IdempotencyMap};
pub use lifecycle::LifecycleScheduler;
pub use orchestrator::OrderService;
pub use risk_engine::{RiskAssessment, RiskEngine};
pub use routing::{BrokerRouter, FirstSupportedRouter, Routing};
pub use system::Application;
