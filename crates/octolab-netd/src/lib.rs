pub mod bridge;
pub mod client;
pub mod server;

pub use client::{create, destroy, ping};
