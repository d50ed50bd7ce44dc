pub mod emails;
pub mod health;
