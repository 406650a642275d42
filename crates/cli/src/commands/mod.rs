pub mod config;
pub mod simulate;
pub mod spec;
pub mod utils;

pub use config::{handle_config_command, ConfigCommands};
pub use simulate::{run_simulation, SimulateArgs};
pub use spec::{handle_spec_command, SpecCommands};
