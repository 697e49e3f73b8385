pub mod builder;
pub mod error_data;
pub mod metric;
pub mod segment;
pub mod transaction;
pub mod wire;
