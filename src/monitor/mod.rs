//! Audio level monitoring and noise-gate classification.

pub mod level_monitor;

pub use level_monitor::{LevelMonitor, LevelSample, MonitorSettings, NoiseGateConfig};
