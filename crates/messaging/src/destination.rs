use crate::payload::Payload;

use std::fmt::{Display, Formatter, Result as FmtResult};

use heck::ToKebabCase;

/// Default partition count for newly provisioned destinations.
pub const DEFAULT_PARTITION_COUNT: i32 = 3;

/// Default replication factor for newly provisioned destinations.
pub const DEFAULT_REPLICATION_FACTOR: i32 = 3;

/// A named topic, stream or subject that records are published to.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Destination {
    name: String,
    partition_count: i32,
    replication_factor: i32,
}

impl Destination {
    /// Creates a destination with an explicit name and default provisioning parameters.
    #[must_use]
    pub fn new<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        Self {
            name: name.into(),
            partition_count: DEFAULT_PARTITION_COUNT,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
        }
    }

    /// Resolves the canonical destination for a payload type.
    #[must_use]
    pub fn of<T: Payload>() -> Self {
        Self::new(resolve_name(T::module(), T::type_name()))
    }

    /// Overrides the partition count used when provisioning.
    #[must_use]
    pub const fn with_partitions(mut self, partition_count: i32) -> Self {
        self.partition_count = partition_count;
        self
    }

    /// Overrides the replication factor used when provisioning.
    #[must_use]
    pub const fn with_replication(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    /// The destination name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Partitions requested at creation (ignored by backends without partitions).
    #[must_use]
    pub const fn partition_count(&self) -> i32 {
        self.partition_count
    }

    /// Replicas requested at creation (ignored by backends without replication).
    #[must_use]
    pub const fn replication_factor(&self) -> i32 {
        self.replication_factor
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.name)
    }
}

impl From<&str> for Destination {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Destination {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Joins a module and type name as `<lowercased-module>.<kebab-case-type>`.
///
/// Letter/digit transitions in the type name are word boundaries, so
/// `OrderV2` becomes `order-v-2`.
#[must_use]
pub fn resolve_name(module: &str, type_name: &str) -> String {
    format!(
        "{}.{}",
        module.to_lowercase(),
        split_digits(type_name).to_kebab_case()
    )
}

fn split_digits(name: &str) -> String {
    let mut split = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;

    for c in name.chars() {
        if let Some(p) = prev {
            let boundary = (p.is_alphabetic() && c.is_ascii_digit())
                || (p.is_ascii_digit() && c.is_alphabetic());
            if boundary {
                split.push(' ');
            }
        }

        split.push(c);
        prev = Some(c);
    }

    split
}

/// Prefixes a consumer group with the owning application's name.
#[must_use]
pub fn namespace_group(app_name: &str, group: &str) -> String {
    format!("{app_name}.{group}")
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Deserialize, Serialize)]
    struct Order {
        #[serde(rename = "Field")]
        field: String,
    }

    impl Payload for Order {
        fn module() -> &'static str {
            "billing"
        }
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    struct InvoiceLineAdded;

    impl Payload for InvoiceLineAdded {
        fn module() -> &'static str {
            "Billing"
        }
    }

    #[test]
    fn test_order_from_billing_resolves() {
        assert_eq!(Destination::of::<Order>().name(), "billing.order");
    }

    #[test]
    fn test_names_are_kebab_and_lowercase() {
        assert_eq!(
            Destination::of::<InvoiceLineAdded>().name(),
            "billing.invoice-line-added"
        );
        assert_eq!(resolve_name("Shop", "HTTPRequest"), "shop.http-request");
    }

    #[test]
    fn test_digits_start_new_words() {
        assert_eq!(resolve_name("billing", "OrderV2"), "billing.order-v-2");
        assert_eq!(resolve_name("billing", "Sha256Digest"), "billing.sha-256-digest");
        assert_eq!(resolve_name("billing", "Route66"), "billing.route-66");
        assert_eq!(resolve_name("billing", "V2Order"), "billing.v-2-order");
    }

    #[test]
    fn test_resolution_is_stable() {
        assert_eq!(Destination::of::<Order>(), Destination::of::<Order>());
    }

    #[test]
    fn test_defaults_and_overrides() {
        let destination = Destination::new("billing.order");
        assert_eq!(destination.partition_count(), DEFAULT_PARTITION_COUNT);
        assert_eq!(destination.replication_factor(), DEFAULT_REPLICATION_FACTOR);

        let destination = destination.with_partitions(12).with_replication(1);
        assert_eq!(destination.partition_count(), 12);
        assert_eq!(destination.replication_factor(), 1);
        assert_eq!(destination.to_string(), "billing.order");
    }

    #[test]
    fn test_namespace_group() {
        assert_eq!(namespace_group("billing", "invoicer"), "billing.invoicer");
    }
}
