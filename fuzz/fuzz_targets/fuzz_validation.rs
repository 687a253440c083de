//! Fuzz testing for request validation and query parsing.
//!
//! Checks that untrusted input never panics:
//!
//! - `validate_product` over arbitrary product attributes
//! - `validate_signup` over arbitrary account fields
//! - `Pagination::from_raw` and `lenient_int` over arbitrary query strings
//! - JSON decoding of product envelopes from raw bytes
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use product_catalog::models::{ProductEnvelope, ProductParams, SignupParams};
use product_catalog::pagination::{Pagination, lenient_int};
use product_catalog::validation::{validate_product, validate_signup};
use serde_json::Value;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    name: Option<&'a str>,
    price: Option<&'a str>,
    price_number: Option<f64>,
    status: Option<&'a str>,
    stock_quantity: Option<i64>,
    stock_as_text: bool,
    page: Option<&'a str>,
    per_page: Option<&'a str>,
    raw_body: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    let price = match (input.price, input.price_number) {
        (Some(raw), _) => Some(Value::from(raw)),
        (None, Some(number)) => Some(Value::from(number)),
        (None, None) => None,
    };
    let stock_quantity = input.stock_quantity.map(|quantity| {
        if input.stock_as_text {
            Value::from(quantity.to_string())
        } else {
            Value::from(quantity)
        }
    });

    let params = ProductParams {
        name: input.name.map(Value::from),
        price,
        status: input.status.map(Value::from),
        stock_quantity,
    };
    if let Ok(attributes) = validate_product(&params) {
        assert!(attributes.stock_quantity >= 0);
        assert!(!attributes.name.trim().is_empty());
    }

    let _ = validate_signup(&SignupParams {
        email: input.name.map(str::to_string),
        password: input.status.map(str::to_string),
        password_confirmation: input.page.map(str::to_string),
    });

    let page = Pagination::from_raw(input.page, input.per_page);
    assert!(page.page >= 1);
    assert!((1..=100).contains(&page.per_page));
    let _ = page.offset();
    let _ = page.meta(input.stock_quantity.unwrap_or_default().unsigned_abs());

    if let Some(raw) = input.page {
        let _ = lenient_int(raw);
    }

    let _ = serde_json::from_slice::<ProductEnvelope>(input.raw_body);
});
