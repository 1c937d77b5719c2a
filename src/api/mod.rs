pub mod error;
pub mod nodes;
pub mod response;
pub mod server;
