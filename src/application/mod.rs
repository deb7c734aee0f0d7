//! Application services layer.

pub mod catalog;
pub mod error;
pub mod messages;
pub mod notify;
pub mod repos;
pub mod validation;
