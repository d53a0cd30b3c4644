pub mod day;
pub mod deep_link;
pub mod error;
pub mod habit;
pub mod kv;
pub mod notifications;
pub mod service;
pub mod signal;
pub mod stats;
pub mod store;
pub mod widget;

pub use crate::service::{HabitService, HabitServiceBuilder};
