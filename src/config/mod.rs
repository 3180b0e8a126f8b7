mod run_config;
mod settings;

pub use run_config::{GpuLevel, RunConfig};

pub use settings::{load_settings, GpuTimeouts, Settings};
