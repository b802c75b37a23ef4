pub mod health;

pub use health::{health_handler, health_live_handler, hosts_handler, metrics_handler};
