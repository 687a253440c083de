mod account;
mod product;

pub use account::{AccountService, DENYLIST_PREFIX};
pub use product::{CreateOutcome, ProductService};
