pub mod exchange;
pub mod fill;
pub mod order;
pub mod position;
