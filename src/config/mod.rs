//! Configuration module: process-wide tunables and their JSON persistence.

mod loader;
mod schema;

pub use loader::{write_default, ConfigStore, CONFIG_FILE};
pub use schema::Config;
