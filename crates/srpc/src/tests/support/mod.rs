//! Test harness utilities shared by the unit and behavioural suites.

mod config_loader;
mod peer;
mod reporter;
mod world;

pub use config_loader::{FailingConfigLoader, InvalidConfigLoader, TestConfigLoader, fast_config};
pub use peer::RawPeer;
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::{BootstrapWorld, EngineWorld, UNTOUCHED, bootstrap_world, engine_world};
