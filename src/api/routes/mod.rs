//! API route modules.

pub mod dj;
pub mod listener;
