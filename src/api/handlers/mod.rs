pub mod attempts;
pub mod health;
pub mod login;
pub mod trust;
mod utils;
