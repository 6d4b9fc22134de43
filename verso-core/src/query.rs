//! Canonical query descriptors.
//!
//! A [`QueryDescriptor`] is the comparable identity of "what is being asked
//! for", independent of how the caller phrased it. Filters are a conjunction
//! and are kept sorted and de-duplicated, so two descriptors that select the
//! same rows compare equal (and serialize identically) no matter the order
//! the filters were added in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::mem::discriminant;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::identity::{Association, RecordId, RecordType, Timestamp};

/// A comparable field value.
///
/// Floats are deliberately absent so descriptors stay `Eq + Ord + Hash`;
/// store decimals as scaled integers or text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
    Timestamp(Timestamp),
    List(Vec<FieldValue>),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<Timestamp> for FieldValue {
    fn from(value: Timestamp) -> Self {
        Self::Timestamp(value)
    }
}

impl From<RecordId> for FieldValue {
    fn from(id: RecordId) -> Self {
        match id {
            RecordId::Int(n) => Self::Int(n),
            RecordId::Uuid(u) => Self::Uuid(u),
            RecordId::Text(s) => Self::Text(s),
        }
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (for strings)
    Contains,
    /// In list of values
    In,
    /// Field is absent or null (the comparison value is ignored)
    IsNull,
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilterExpr {
    pub field: String,
    pub operator: FilterOperator,
    pub value: FieldValue,
}

impl FilterExpr {
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FieldValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a membership filter.
    pub fn is_in(field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self::new(field, FilterOperator::In, FieldValue::List(values))
    }

    /// Evaluate this filter against a record's field value.
    ///
    /// Ordering comparisons only hold between values of the same kind; a
    /// `Text` field is never greater than an `Int` literal.
    pub fn matches(&self, actual: Option<&FieldValue>) -> bool {
        let actual = match (self.operator, actual) {
            (FilterOperator::IsNull, value) => {
                return matches!(value, None | Some(FieldValue::Null));
            }
            (_, None) => return false,
            (_, Some(value)) => value,
        };

        let comparable = discriminant(actual) == discriminant(&self.value);
        match self.operator {
            FilterOperator::Eq => actual == &self.value,
            FilterOperator::Ne => actual != &self.value,
            FilterOperator::Gt => comparable && actual > &self.value,
            FilterOperator::Lt => comparable && actual < &self.value,
            FilterOperator::Gte => comparable && actual >= &self.value,
            FilterOperator::Lte => comparable && actual <= &self.value,
            FilterOperator::Contains => match (actual, &self.value) {
                (FieldValue::Text(haystack), FieldValue::Text(needle)) => {
                    haystack.contains(needle.as_str())
                }
                (FieldValue::List(items), needle) => items.contains(needle),
                _ => false,
            },
            FilterOperator::In => match &self.value {
                FieldValue::List(candidates) => candidates.contains(actual),
                _ => false,
            },
            FilterOperator::IsNull => matches!(actual, FieldValue::Null),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One ordering term. Terms apply left to right.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Filter, order, limit and offset for a multi-record query.
///
/// An optional id restriction limits the scan to a set of primary keys. It
/// is matched against the record's id, not against any named field, so it
/// works whatever the key column is called.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ids: Option<BTreeSet<RecordId>>,
    filters: Vec<FilterExpr>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter (conjunctive). Duplicate filters are folded.
    pub fn filter(mut self, expr: FilterExpr) -> Self {
        if let Err(pos) = self.filters.binary_search(&expr) {
            self.filters.insert(pos, expr);
        }
        self
    }

    /// Restrict the scan to these primary keys (conjunctive). Restricting
    /// twice keeps the intersection.
    pub fn restrict_ids<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = RecordId>,
    {
        let ids: BTreeSet<RecordId> = ids.into_iter().collect();
        self.ids = Some(match self.ids.take() {
            Some(current) => current.intersection(&ids).cloned().collect(),
            None => ids,
        });
        self
    }

    /// Shorthand for an equality filter.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(FilterExpr::eq(field, value))
    }

    /// Append an ordering term.
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn id_restriction(&self) -> Option<&BTreeSet<RecordId>> {
        self.ids.as_ref()
    }

    pub fn filters(&self) -> &[FilterExpr] {
        &self.filters
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn row_limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn row_offset(&self) -> Option<u64> {
        self.offset
    }

    /// The row scope used for version probing: id restriction and filters.
    ///
    /// Order, limit and offset pick a window out of the scope; they never
    /// change which rows can affect the window, so the probe ignores them.
    pub fn scope(&self) -> Predicate {
        Predicate {
            ids: self.ids.clone(),
            filters: self.filters.clone(),
            ..Predicate::default()
        }
    }

    /// True when the id restriction, if any, contains `id`.
    pub fn admits(&self, id: &RecordId) -> bool {
        self.ids.as_ref().map_or(true, |ids| ids.contains(id))
    }

    /// True when every filter matches the given field lookup.
    pub fn matches<F>(&self, mut field: F) -> bool
    where
        F: FnMut(&str) -> Option<FieldValue>,
    {
        self.filters
            .iter()
            .all(|expr| expr.matches(field(expr.field.as_str()).as_ref()))
    }
}

/// Which records a descriptor selects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Explicit ids (set semantics).
    Ids(BTreeSet<RecordId>),
    /// Filtered, ordered, windowed scan.
    Predicate(Predicate),
}

/// Canonical identity of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    record_type: RecordType,
    selection: Selection,
    includes: BTreeSet<Association>,
}

impl QueryDescriptor {
    /// Select one record by id.
    pub fn find(record_type: impl Into<RecordType>, id: impl Into<RecordId>) -> Self {
        Self::find_many(record_type, [id.into()])
    }

    /// Select several records by id.
    pub fn find_many<I>(record_type: impl Into<RecordType>, ids: I) -> Self
    where
        I: IntoIterator<Item = RecordId>,
    {
        Self {
            record_type: record_type.into(),
            selection: Selection::Ids(ids.into_iter().collect()),
            includes: BTreeSet::new(),
        }
    }

    /// Select every record of a type.
    pub fn all(record_type: impl Into<RecordType>) -> Self {
        Self::matching(record_type, Predicate::new())
    }

    /// Select the records matching a predicate.
    pub fn matching(record_type: impl Into<RecordType>, predicate: Predicate) -> Self {
        Self {
            record_type: record_type.into(),
            selection: Selection::Predicate(predicate),
            includes: BTreeSet::new(),
        }
    }

    /// Eager-load an association with every selected record.
    pub fn include(mut self, association: impl Into<Association>) -> Self {
        self.includes.insert(association.into());
        self
    }

    pub fn with_includes<I, A>(mut self, associations: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Association>,
    {
        self.includes
            .extend(associations.into_iter().map(Into::into));
        self
    }

    /// Add a filter. An id selection becomes a predicate restricted to
    /// those ids plus the filter.
    pub fn filter(self, expr: FilterExpr) -> Self {
        self.map_predicate(|p| p.filter(expr))
    }

    pub fn order_by(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.map_predicate(|p| p.order_by(field, direction))
    }

    pub fn limit(self, limit: u64) -> Self {
        self.map_predicate(|p| p.limit(limit))
    }

    pub fn offset(self, offset: u64) -> Self {
        self.map_predicate(|p| p.offset(offset))
    }

    fn map_predicate<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Predicate) -> Predicate,
    {
        let predicate = match self.selection {
            Selection::Predicate(p) => p,
            Selection::Ids(ids) => Predicate::new().restrict_ids(ids),
        };
        self.selection = Selection::Predicate(f(predicate));
        self
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn includes(&self) -> &BTreeSet<Association> {
        &self.includes
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        match &self.selection {
            Selection::Predicate(p) => Some(p),
            Selection::Ids(_) => None,
        }
    }

    pub fn ids(&self) -> Option<&BTreeSet<RecordId>> {
        match &self.selection {
            Selection::Ids(ids) => Some(ids),
            Selection::Predicate(_) => None,
        }
    }

    /// Short tag describing the selection shape, used in cache keys.
    pub fn kind(&self) -> &'static str {
        match &self.selection {
            Selection::Ids(ids) if ids.len() == 1 => "one",
            Selection::Ids(_) => "ids",
            Selection::Predicate(_) => "set",
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.record_type.validate()?;
        if let Selection::Ids(ids) = &self.selection {
            if ids.is_empty() {
                return Err(ValidationError::EmptyIdSet {
                    record_type: self.record_type.clone(),
                });
            }
        }
        Ok(())
    }
}
