pub mod api;
pub mod app;
pub mod audio;
pub mod broadcast;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod global;
pub mod listener;
pub mod monitor;

#[cfg(test)]
mod test_support;
