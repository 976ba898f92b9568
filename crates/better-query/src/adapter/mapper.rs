//! Object-mapper adapter.
//!
//! Targets a repository-style query: a constraint tree over (possibly dotted)
//! property paths plus query settings for storage pages, enable fields and
//! language. Relation operators (`has`, `hasany`, `hasall`) are available
//! here and compile to `contains` constraints.

use serde::{Deserialize, Serialize};

use super::{QueryAdapter, combine_unless_single};
use crate::context::QueryContext;
use crate::error::{QueryError, QueryResult};
use crate::query::settings::{OverlayMode, QuerySettings};
use crate::query::types::{FilterValue, Operator, QuerySort};

/// Comparison operators of the constraint tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    Like,
    /// Relation (collection) contains the operand.
    Contains,
}

/// A node of the object-mapper constraint tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Comparison {
        property: String,
        operator: ComparisonOperator,
        operand: FilterValue,
    },
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Not(Box<Constraint>),
}

impl Constraint {
    pub fn comparison(
        property: impl Into<String>,
        operator: ComparisonOperator,
        operand: impl Into<FilterValue>,
    ) -> Self {
        Constraint::Comparison {
            property: property.into(),
            operator,
            operand: operand.into(),
        }
    }

    pub fn negate(self) -> Self {
        Constraint::Not(Box::new(self))
    }
}

/// Language the mapper should read records in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageAspect {
    pub id: i64,
    pub overlay: OverlayMode,
}

/// Query settings of a mapper query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MapperSettings {
    pub respect_storage_page: bool,
    pub storage_page_ids: Vec<i64>,
    pub ignore_enable_fields: bool,
    pub include_deleted: bool,
    pub language: Option<LanguageAspect>,
}

/// A compiled object-mapper query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapperQuery {
    /// Domain entity name (e.g. "News").
    pub entity: String,
    /// Table the entity is persisted in.
    pub table: String,
    pub constraint: Option<Constraint>,
    pub orderings: Vec<QuerySort>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub settings: MapperSettings,
}

/// Adapter targeting an object-mapper query.
#[derive(Debug, Clone)]
pub struct MapperAdapter {
    base: MapperQuery,
    settings: QuerySettings,
    context: QueryContext,
}

impl MapperAdapter {
    pub fn new(entity: impl Into<String>, table: impl Into<String>, context: QueryContext) -> Self {
        Self {
            base: MapperQuery {
                entity: entity.into(),
                table: table.into(),
                constraint: None,
                orderings: Vec::new(),
                limit: None,
                offset: None,
                settings: MapperSettings::default(),
            },
            settings: QuerySettings::default(),
            context,
        }
    }

    /// Replace the initial settings.
    pub fn with_settings(mut self, settings: QuerySettings) -> Self {
        self.settings = settings;
        self
    }

    fn relation_constraint(
        &self,
        operator: Operator,
        field: &str,
        value: &FilterValue,
        key: &str,
    ) -> QueryResult<Constraint> {
        let contains = |operand: FilterValue| {
            Constraint::comparison(field, ComparisonOperator::Contains, operand)
        };

        match operator {
            Operator::Has => {
                if value.is_list() {
                    return Err(QueryError::invalid_value(
                        key,
                        "has expects a single value; use hasany or hasall for lists",
                    ));
                }
                Ok(contains(value.clone()))
            }
            Operator::HasAny | Operator::HasAll => {
                let operands = self.ensure_array_value(value.clone(), key);
                if operands.is_empty() {
                    return Err(QueryError::invalid_value(key, "expects at least one value"));
                }
                let parts = operands.into_iter().map(contains).collect();
                Ok(if operator == Operator::HasAny {
                    self.make_or(parts)
                } else {
                    self.make_and(parts)
                })
            }
            _ => Err(QueryError::grammar(key, "not a relation operator")),
        }
    }
}

impl QueryAdapter for MapperAdapter {
    type Predicate = Constraint;
    type Native = MapperQuery;

    fn table_name(&self) -> &str {
        &self.base.table
    }

    fn context(&self) -> &QueryContext {
        &self.context
    }

    fn supports_relation_operators(&self) -> bool {
        true
    }

    fn native(&self) -> &MapperQuery {
        &self.base
    }

    fn make_condition(
        &self,
        operator: Operator,
        field: &str,
        value: &FilterValue,
        negated: bool,
    ) -> QueryResult<Constraint> {
        let key = format!("{field} {operator}");
        let compare = |op: ComparisonOperator, operand: FilterValue| {
            Constraint::comparison(field, op, operand)
        };
        let scalar = |value: &FilterValue| {
            if value.is_list() {
                Err(QueryError::invalid_value(
                    &key,
                    "a list is only valid with '=', '!=' or 'in'",
                ))
            } else {
                Ok(value.clone())
            }
        };

        let constraint = match operator {
            Operator::Equals if value.is_list() => compare(ComparisonOperator::In, value.clone()),
            Operator::Equals => compare(ComparisonOperator::Equals, value.clone()),
            Operator::NotEquals if value.is_list() => {
                compare(ComparisonOperator::In, value.clone()).negate()
            }
            Operator::NotEquals => compare(ComparisonOperator::NotEquals, value.clone()),
            Operator::GreaterThan => compare(ComparisonOperator::GreaterThan, scalar(value)?),
            Operator::GreaterOrEqual => {
                compare(ComparisonOperator::GreaterThanOrEqual, scalar(value)?)
            }
            Operator::LessThan => compare(ComparisonOperator::LessThan, scalar(value)?),
            Operator::LessOrEqual => compare(ComparisonOperator::LessThanOrEqual, scalar(value)?),
            Operator::In => compare(
                ComparisonOperator::In,
                FilterValue::List(self.ensure_array_value(value.clone(), &key)),
            ),
            Operator::Like => {
                let pattern = value
                    .as_string()
                    .ok_or_else(|| QueryError::invalid_value(&key, "like expects a scalar"))?;
                compare(ComparisonOperator::Like, FilterValue::String(pattern))
            }
            Operator::Has | Operator::HasAny | Operator::HasAll => {
                self.relation_constraint(operator, field, value, &key)?
            }
        };

        Ok(if negated {
            constraint.negate()
        } else {
            constraint
        })
    }

    fn make_and(&self, predicates: Vec<Constraint>) -> Constraint {
        combine_unless_single(predicates, Constraint::And)
    }

    fn make_or(&self, predicates: Vec<Constraint>) -> Constraint {
        combine_unless_single(predicates, Constraint::Or)
    }

    fn negate(&self, predicate: Constraint) -> Constraint {
        predicate.negate()
    }

    fn finalize_constraints(&self, root: Option<Constraint>) -> QueryResult<MapperQuery> {
        let pids = self.resolve_pids()?;
        let mut query = self.base.clone();

        query.constraint = root;
        query.orderings = self.settings.orderings.clone();
        query.limit = self.settings.limit;
        query.offset = self.settings.offset;
        query.settings = MapperSettings {
            respect_storage_page: pids.is_some(),
            storage_page_ids: pids.unwrap_or_default(),
            ignore_enable_fields: self.settings.include_hidden,
            include_deleted: self.settings.include_deleted,
            language: self.resolve_language().map(|id| LanguageAspect {
                id,
                overlay: self.settings.overlay_mode,
            }),
        };

        tracing::trace!(entity = %query.entity, "finalized mapper query");
        Ok(query)
    }

    fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut QuerySettings {
        &mut self.settings
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::settings::{LanguageScope, PidScope};

    fn adapter() -> MapperAdapter {
        MapperAdapter::new("News", "tx_news", QueryContext::default())
    }

    #[test]
    fn comparison_mapping() {
        let a = adapter();
        assert_eq!(
            a.make_condition(Operator::GreaterOrEqual, "age", &18.into(), false)
                .unwrap(),
            Constraint::comparison("age", ComparisonOperator::GreaterThanOrEqual, 18)
        );
        assert_eq!(
            a.make_condition(Operator::Equals, "uid", &[1, 2].into(), false)
                .unwrap(),
            Constraint::comparison("uid", ComparisonOperator::In, [1, 2])
        );
        assert_eq!(
            a.make_condition(Operator::In, "uid", &"3,4".into(), false)
                .unwrap(),
            Constraint::comparison("uid", ComparisonOperator::In, [3, 4])
        );
    }

    #[test]
    fn negation_wraps_in_not() {
        let a = adapter();
        let plain = a
            .make_condition(Operator::Like, "title", &"%foo%".into(), false)
            .unwrap();
        let negated = a
            .make_condition(Operator::Like, "title", &"%foo%".into(), true)
            .unwrap();
        assert_eq!(negated, plain.negate());
    }

    #[test]
    fn relation_operators() {
        let a = adapter();
        assert!(a.supports_relation_operators());

        assert_eq!(
            a.make_condition(Operator::Has, "company.uid", &12.into(), false)
                .unwrap(),
            Constraint::comparison("company.uid", ComparisonOperator::Contains, 12)
        );
        assert_eq!(
            a.make_condition(Operator::HasAny, "tags", &[1, 2].into(), false)
                .unwrap(),
            Constraint::Or(vec![
                Constraint::comparison("tags", ComparisonOperator::Contains, 1),
                Constraint::comparison("tags", ComparisonOperator::Contains, 2),
            ])
        );
        assert_eq!(
            a.make_condition(Operator::HasAll, "tags", &[1, 2].into(), false)
                .unwrap(),
            Constraint::And(vec![
                Constraint::comparison("tags", ComparisonOperator::Contains, 1),
                Constraint::comparison("tags", ComparisonOperator::Contains, 2),
            ])
        );
        // A single operand is not wrapped.
        assert_eq!(
            a.make_condition(Operator::HasAll, "tags", &5.into(), false)
                .unwrap(),
            Constraint::comparison("tags", ComparisonOperator::Contains, 5)
        );
    }

    #[test]
    fn relation_operator_value_errors() {
        let a = adapter();
        assert!(
            a.make_condition(Operator::Has, "tags", &[1, 2].into(), false)
                .is_err()
        );
        assert!(
            a.make_condition(Operator::HasAny, "tags", &FilterValue::Null, false)
                .is_err()
        );
    }

    #[test]
    fn finalize_applies_settings() {
        let mut a = adapter();
        a.settings_mut().pids = PidScope::from_value(vec![3, 4].into());
        a.settings_mut().include_hidden = true;
        a.settings_mut().language = LanguageScope::Id(1);
        a.set_limit(Some(5));

        let root = Constraint::comparison("uid", ComparisonOperator::Equals, 1);
        let query = a.finalize_constraints(Some(root.clone())).unwrap();

        assert_eq!(query.constraint, Some(root));
        assert_eq!(query.limit, Some(5));
        assert!(query.settings.respect_storage_page);
        assert_eq!(query.settings.storage_page_ids, vec![3, 4]);
        assert!(query.settings.ignore_enable_fields);
        assert!(!query.settings.include_deleted);
        assert_eq!(
            query.settings.language,
            Some(LanguageAspect {
                id: 1,
                overlay: OverlayMode::Mixed
            })
        );
        assert!(a.native().constraint.is_none());
    }

    #[test]
    fn finalize_without_page_scope() {
        let mut a = adapter();
        a.settings_mut().pids = PidScope::Disabled;
        a.settings_mut().language = LanguageScope::Disabled;
        let query = a.finalize_constraints(None).unwrap();
        assert!(!query.settings.respect_storage_page);
        assert!(query.settings.storage_page_ids.is_empty());
        assert!(query.settings.language.is_none());
    }
}
