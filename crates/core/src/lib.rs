//! Domain types shared by the producing and notifying sides of the user
//! lifecycle notification pipeline.

pub mod error;
pub mod event;
pub mod templates;
pub mod topics;
