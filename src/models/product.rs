use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Storage name of the products collection; also the cache key namespace.
pub const PRODUCTS_TABLE: &str = "products";

/// Product lifecycle status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Active,
    Archived,
}

impl ProductStatus {
    pub const ALL: [ProductStatus; 2] = [ProductStatus::Active, ProductStatus::Archived];

    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Archived => "archived",
        }
    }
}

impl FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProductStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown product status '{s}'"))
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted product.
///
/// `price` uses `Decimal` for exact monetary representation and serializes
/// as a string (e.g. `"9.99"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub status: ProductStatus,
    pub stock_quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated attributes for inserting or overwriting a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductAttributes {
    pub name: String,
    pub price: Decimal,
    pub status: ProductStatus,
    pub stock_quantity: i64,
}

/// Raw product attributes from a request body.
///
/// Each field keeps the JSON value as sent so that type errors surface as
/// validation messages (see [`crate::validation::validate_product`]). `None`
/// means the key was absent and `Some(Value::Null)` an explicit `null`:
/// updates keep the stored value for the former and validate the latter.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProductParams {
    #[serde(default, deserialize_with = "present")]
    pub name: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub price: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub status: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub stock_quantity: Option<Value>,
}

/// A key that is present yields `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ProductParams {
    /// Fill every absent field from `existing`, producing the full attribute
    /// set a partial update would persist.
    pub fn merged_onto(self, existing: &Product) -> ProductParams {
        ProductParams {
            name: self.name.or_else(|| Some(Value::from(existing.name.as_str()))),
            price: self
                .price
                .or_else(|| Some(Value::from(existing.price.to_string()))),
            status: self
                .status
                .or_else(|| Some(Value::from(existing.status.as_str()))),
            stock_quantity: self
                .stock_quantity
                .or_else(|| Some(Value::from(existing.stock_quantity))),
        }
    }
}

/// Request body root for product writes: `{"product": {...}}`.
#[derive(Debug, Deserialize)]
pub struct ProductEnvelope {
    #[serde(default)]
    pub product: Option<ProductParams>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample() -> Product {
        let now = Utc::now();
        Product {
            id: 7,
            name: "Widget".to_string(),
            price: Decimal::from_str("9.99").unwrap(),
            status: ProductStatus::Active,
            stock_quantity: 5,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("active".parse::<ProductStatus>().unwrap(), ProductStatus::Active);
        assert_eq!("archived".parse::<ProductStatus>().unwrap(), ProductStatus::Archived);
        assert!("Active".parse::<ProductStatus>().is_err());
        assert!("deleted".parse::<ProductStatus>().is_err());
    }

    #[test]
    fn test_product_serializes_price_as_string() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["price"], "9.99");
        assert_eq!(json["status"], "active");
        assert_eq!(json["stock_quantity"], 5);
    }

    #[test]
    fn test_params_keep_raw_values() {
        let params: ProductParams =
            serde_json::from_str(r#"{"price": "abc", "stock_quantity": 1.5}"#).unwrap();

        assert_eq!(params.price, Some(Value::from("abc")));
        assert_eq!(params.stock_quantity, Some(Value::from(1.5)));
        assert!(params.name.is_none());
    }

    #[test]
    fn test_params_tell_null_from_absent() {
        let params: ProductParams = serde_json::from_str(r#"{"name": null}"#).unwrap();
        assert_eq!(params.name, Some(Value::Null));
        assert_eq!(params.price, None);
    }

    #[test]
    fn test_params_ignore_unknown_fields() {
        let params: ProductParams =
            serde_json::from_str(r#"{"name": "Widget", "id": 99, "sku": "W-1"}"#).unwrap();
        assert_eq!(params.name, Some(Value::from("Widget")));
    }

    #[test]
    fn test_merged_onto_keeps_existing_fields() {
        let existing = sample();
        let merged = ProductParams {
            name: Some(Value::from("Gadget")),
            ..ProductParams::default()
        }
        .merged_onto(&existing);

        assert_eq!(merged.name, Some(Value::from("Gadget")));
        assert_eq!(merged.price, Some(Value::from("9.99")));
        assert_eq!(merged.status, Some(Value::from("active")));
        assert_eq!(merged.stock_quantity, Some(Value::from(5)));
    }

    #[test]
    fn test_merged_onto_keeps_explicit_null() {
        let merged = ProductParams {
            name: Some(Value::Null),
            ..ProductParams::default()
        }
        .merged_onto(&sample());

        assert_eq!(merged.name, Some(Value::Null));
    }

    #[test]
    fn test_envelope_without_product_key() {
        let envelope: ProductEnvelope = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert!(envelope.product.is_none());
    }
}
