pub mod api;
pub mod codec;
pub mod config;
pub mod nodes;
pub mod prompt;
pub mod trace;
pub mod transport;
pub mod vendors;
