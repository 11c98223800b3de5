//! Service configuration.
//!
//! Configuration is read once at startup from an optional `config` file and
//! `KBFLOW__SECTION__KEY` environment variables.

mod loader;
mod static_config;

pub use loader::load_static_config;
pub use static_config::StaticConfig;
