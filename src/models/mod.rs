mod api;
mod product;
mod user;

pub use api::{
    AccountResponse, HealthResponse, MessageResponse, ProductListResponse, ProductResponse,
};
pub use product::{
    PRODUCTS_TABLE, Product, ProductAttributes, ProductEnvelope, ProductParams, ProductStatus,
};
pub use user::{Credentials, NewUser, Role, SignupParams, User, UserEnvelope, UserResponse};
