mod auth;
mod health;
mod products;

pub use auth::{login, logout, signup};
pub use health::{health_check, readiness_check};
pub use products::{create_product, delete_product, get_product, list_products, update_product};
