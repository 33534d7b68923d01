pub mod connection;
pub mod hub;
pub mod membership;
pub mod retention;
