pub mod client;
pub mod resilient;

pub use client::PortfolioClient;
pub use resilient::ResilientPortfolioService;
