//! Discriminator scoping for typed queries.
//!
//! # Invariants
//! - Every predicate built here is constrained to `type = T::TYPE_NAME`.
//! - With strict checking on, items read back with another discriminator
//!   are rejected rather than silently returned.

use crate::error::{RepoError, RepoResult};
use crate::model::item::Item;
use crate::query::{field, Filter, Query};
use std::marker::PhantomData;

/// Discriminator property written on every item.
pub const TYPE_FIELD: &str = "type";

#[derive(Debug, Clone, Copy)]
pub struct ExpressionProvider<T> {
    strict: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T: Item> ExpressionProvider<T> {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            _item: PhantomData,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// `type = T::TYPE_NAME`.
    pub fn default_filter(&self) -> Filter {
        field(TYPE_FIELD).eq(T::TYPE_NAME)
    }

    /// `type = T::TYPE_NAME AND (filter)`.
    pub fn build(&self, filter: Filter) -> Filter {
        self.default_filter().and(filter)
    }

    pub fn build_query(&self, filter: Filter) -> Query {
        Query::new(self.build(filter))
    }

    /// Rejects `item` when strict checking is on and its discriminator differs.
    pub fn check_item(&self, item: &T) -> RepoResult<()> {
        if self.strict && item.item_type() != T::TYPE_NAME {
            return Err(RepoError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                actual: item.item_type().to_string(),
                id: item.id().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ExpressionProvider;
    use crate::error::RepoError;
    use crate::model::item::{Item, ItemHeader};
    use crate::query::{field, Query};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Order {
        #[serde(flatten)]
        header: ItemHeader,
        total: i64,
    }

    impl Item for Order {
        const TYPE_NAME: &'static str = "Order";

        fn header(&self) -> &ItemHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut ItemHeader {
            &mut self.header
        }
    }

    #[test]
    fn build_always_injects_discriminator() {
        let expressions = ExpressionProvider::<Order>::new(true);
        let definition = Query::new(expressions.build(field("total").gt(5))).to_definition();
        assert_eq!(
            definition.text(),
            "SELECT * FROM c WHERE (c.type = @p0 AND c.total > @p1)"
        );
        assert_eq!(definition.parameter("@p0"), Some(&serde_json::json!("Order")));

        let all = Query::new(expressions.build(crate::query::Filter::All)).to_definition();
        assert_eq!(all.text(), "SELECT * FROM c WHERE c.type = @p0");
    }

    #[test]
    fn check_item_respects_strictness() {
        let mut order = Order {
            header: ItemHeader::with_id::<Order>("o1"),
            total: 1,
        };
        order.header.item_type = "Invoice".to_string();

        let err = ExpressionProvider::<Order>::new(true)
            .check_item(&order)
            .expect_err("strict check rejects foreign discriminator");
        assert!(matches!(err, RepoError::TypeMismatch { ref actual, .. } if actual == "Invoice"));

        ExpressionProvider::<Order>::new(false)
            .check_item(&order)
            .expect("lenient check accepts any discriminator");
    }
}
