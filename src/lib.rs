//! Random Coffee: weekly one-on-one meetings for a coworking community.

pub mod api;
pub mod channels;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dialog;
pub mod dispatch;
pub mod error;
pub mod meetings;
pub mod participants;
pub mod scheduler;
pub mod store;
