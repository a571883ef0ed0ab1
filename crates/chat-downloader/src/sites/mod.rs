//! Platform adapters.

pub mod facebook;
pub mod reddit;
pub mod twitch;
pub mod younow;
pub mod youtube;
pub mod zoom;
