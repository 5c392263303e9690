//! Configuration loaded from `sealvault.toml`.

pub mod settings;

pub use settings::Settings;
