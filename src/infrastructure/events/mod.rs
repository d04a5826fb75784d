pub mod publisher;

pub use publisher::HttpEventPublisher;
