//! Built-in transform descriptors for the retail datasets
//!
//! Used when a dataset has no `transform:` block of its own. Lookup is by dataset name.

use indexmap::IndexMap;

use super::{AggregateRule, LineNumberRule, TransformSpec};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn pairs(items: &[(&str, &str)]) -> IndexMap<String, String> {
    items
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

/// Built-in descriptor for a dataset name, if there is one
pub fn builtin(dataset: &str) -> Option<TransformSpec> {
    let spec = match dataset {
        "brands" => TransformSpec {
            trim: strings(&["brand_name"]),
            ..Default::default()
        },
        "categories" => TransformSpec {
            trim: strings(&["category_name"]),
            ..Default::default()
        },
        "products" => TransformSpec {
            trim: strings(&["product_name"]),
            ..Default::default()
        },
        "customers" => TransformSpec {
            trim: strings(&["first_name", "last_name", "email"]),
            ..Default::default()
        },
        "stores" => TransformSpec {
            rename: pairs(&[("name", "store_name")]),
            trim: strings(&["store_name", "email"]),
            ..Default::default()
        },
        "staff" | "staffs" => TransformSpec {
            rename: pairs(&[("name", "staff_first_name"), ("last_name", "staff_last_name")]),
            trim: strings(&[
                "staff_first_name",
                "staff_last_name",
                "phone",
                "email",
                "store_name",
            ]),
            ..Default::default()
        },
        "orders" => TransformSpec {
            rename: pairs(&[("store", "store_name"), ("staff_name", "staff_first_name")]),
            trim: strings(&["store_name", "staff_first_name", "order_status"]),
            date_formats: pairs(&[
                ("order_date", "%d/%m/%Y"),
                ("required_date", "%d/%m/%Y"),
                ("shipped_date", "%d/%m/%Y"),
            ]),
            lenient: strings(&["shipped_date"]),
            ..Default::default()
        },
        "order_items" => TransformSpec {
            line_number: Some(LineNumberRule {
                column: "item_id".to_string(),
                partition_by: strings(&["order_id"]),
                order_by: strings(&["order_id", "product_id"]),
            }),
            ..Default::default()
        },
        "stocks" => TransformSpec {
            rename: pairs(&[("store", "store_name"), ("name", "store_name")]),
            trim: strings(&["store_name"]),
            aggregate: Some(AggregateRule {
                group_by: strings(&["store_name", "product_id"]),
                sum: strings(&["quantity"]),
            }),
            ..Default::default()
        },
        _ => return None,
    };
    Some(spec)
}

/// The effective descriptor: configured, else built-in, else identity
pub fn resolve(dataset: &str, configured: Option<TransformSpec>) -> TransformSpec {
    configured
        .or_else(|| builtin(dataset))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_datasets_have_builtins() {
        for name in [
            "brands",
            "categories",
            "products",
            "customers",
            "stores",
            "staff",
            "staffs",
            "orders",
            "order_items",
            "stocks",
        ] {
            assert!(builtin(name).is_some(), "{} should have a builtin", name);
        }
        assert!(builtin("suppliers").is_none());
    }

    #[test]
    fn test_configured_descriptor_wins() {
        let configured = TransformSpec {
            trim: strings(&["label"]),
            ..Default::default()
        };
        assert_eq!(resolve("brands", Some(configured.clone())), configured);
        assert_eq!(resolve("brands", None), builtin("brands").unwrap());
        assert_eq!(resolve("suppliers", None), TransformSpec::default());
    }

    #[test]
    fn test_orders_shipped_date_is_lenient() {
        let orders = builtin("orders").unwrap();
        assert!(orders.is_lenient("shipped_date"));
        assert!(!orders.is_lenient("order_date"));
        assert_eq!(orders.date_format("required_date"), Some("%d/%m/%Y"));
    }
}
