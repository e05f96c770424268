pub mod error;
pub mod gateway;
pub mod http;
pub mod providers;
pub mod registry;
pub mod status;
pub mod types;
