//! Query descriptors: filter predicates, sort keys, bounds, and cache policy.
//!
//! A [`Query`] is a plain value. Pagers derive page-specific copies from it
//! with [`Query::with_skip`] and [`Query::with_limit`]; the caller's original
//! is never touched.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::{Record, Value};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Where a query is allowed to read its results from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CachePolicy {
    /// Always ask the remote source; the result is written to the cache.
    #[default]
    NetworkOnly,
    /// Only read the local cache; a miss is reported as an error.
    CacheOnly,
    /// Deliver the cached result first, then the network result.
    CacheThenNetwork,
    /// Use the cached result if present, otherwise ask the remote source.
    CacheElseNetwork,
}

impl CachePolicy {
    /// Whether a single execution produces two deliveries (cache, then network).
    #[must_use]
    pub fn is_two_phase(self) -> bool {
        matches!(self, CachePolicy::CacheThenNetwork)
    }

    /// Number of result deliveries one execution produces under this policy.
    #[must_use]
    pub fn delivery_count(self) -> usize {
        if self.is_two_phase() {
            2
        } else {
            1
        }
    }
}

/// Predicate operators for query filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
    And,
    Or,
    Not,
}

/// Sort direction for query ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// A recursive predicate node for query filtering.
///
/// Leaf operators (`eq`, `gt`, ...) compare `attribute` against `value`.
/// `exists` only checks that `attribute` is present. Logical operators
/// (`and`, `or`, `not`) combine `children`; `not` negates its first child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub op: PredicateOp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<Predicate>,
}

impl Predicate {
    /// Builds a leaf comparison `attribute <op> value`.
    #[must_use]
    pub fn compare(op: PredicateOp, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op,
            attribute: Some(attribute.into()),
            value: Some(value.into()),
            children: Vec::new(),
        }
    }

    /// Builds `attribute == value`.
    #[must_use]
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(PredicateOp::Eq, attribute, value)
    }

    /// Builds a presence check for `attribute`.
    #[must_use]
    pub fn exists(attribute: impl Into<String>) -> Self {
        Self {
            op: PredicateOp::Exists,
            attribute: Some(attribute.into()),
            value: None,
            children: Vec::new(),
        }
    }

    /// Builds a conjunction.
    #[must_use]
    pub fn and(children: Vec<Predicate>) -> Self {
        Self::logical(PredicateOp::And, children)
    }

    /// Builds a disjunction.
    #[must_use]
    pub fn or(children: Vec<Predicate>) -> Self {
        Self::logical(PredicateOp::Or, children)
    }

    /// Builds a negation.
    #[must_use]
    pub fn not(child: Predicate) -> Self {
        Self::logical(PredicateOp::Not, vec![child])
    }

    fn logical(op: PredicateOp, children: Vec<Predicate>) -> Self {
        Self {
            op,
            attribute: None,
            value: None,
            children,
        }
    }

    /// Evaluates the predicate against a record.
    ///
    /// A comparison on a missing field is false. The pseudo-field `id`
    /// resolves to the record identifier.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self.op {
            PredicateOp::And => self.children.iter().all(|c| c.matches(record)),
            PredicateOp::Or => self.children.iter().any(|c| c.matches(record)),
            PredicateOp::Not => !self.children.first().is_some_and(|c| c.matches(record)),
            PredicateOp::Exists => self
                .attribute
                .as_deref()
                .is_some_and(|attr| field_value(record, attr).is_some()),
            op => {
                let (Some(attr), Some(expected)) = (self.attribute.as_deref(), &self.value) else {
                    return false;
                };
                let Some(actual) = field_value(record, attr) else {
                    return false;
                };
                let ord = actual.total_cmp(expected);
                match op {
                    PredicateOp::Eq => ord == Ordering::Equal,
                    PredicateOp::Neq => ord != Ordering::Equal,
                    PredicateOp::Gt => ord == Ordering::Greater,
                    PredicateOp::Gte => ord != Ordering::Less,
                    PredicateOp::Lt => ord == Ordering::Less,
                    PredicateOp::Lte => ord != Ordering::Greater,
                    _ => false,
                }
            }
        }
    }
}

/// One ordering key of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Description of a remote fetch: collection, filter, ordering, bounds,
/// and cache policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Name of the collection (class) to read from.
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub predicate: Option<Predicate>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sort: Vec<SortKey>,
    /// Number of matching records to skip before the first returned one.
    #[serde(default)]
    pub skip: u32,
    /// Maximum number of records to return. `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub cache_policy: CachePolicy,
}

impl Query {
    /// Creates an unfiltered, unordered, unbounded query over `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            predicate: None,
            sort: Vec::new(),
            skip: 0,
            limit: None,
            cache_policy: CachePolicy::NetworkOnly,
        }
    }

    /// Adds a filter; multiple filters are combined with `and`.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            None => predicate,
            Some(existing) if existing.op == PredicateOp::And => {
                let mut children = existing.children;
                children.push(predicate);
                Predicate::and(children)
            }
            Some(existing) => Predicate::and(vec![existing, predicate]),
        });
        self
    }

    /// Shorthand for `filter(Predicate::equals(field, value))`.
    #[must_use]
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::equals(field, value))
    }

    /// Appends an ascending sort key.
    #[must_use]
    pub fn order_by_ascending(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction: SortDirection::Asc,
        });
        self
    }

    /// Appends a descending sort key.
    #[must_use]
    pub fn order_by_descending(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction: SortDirection::Desc,
        });
        self
    }

    #[must_use]
    pub fn with_skip(mut self, skip: u32) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Whether `record` passes this query's filter.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.matches(record))
    }

    /// Orders two records by this query's sort keys.
    ///
    /// Records equal on every key fall back to identifier order so that
    /// results are stable across executions. Missing fields sort first.
    #[must_use]
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.sort {
            let ord = match (field_value(a, &key.field), field_value(b, &key.field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.total_cmp(&y),
            };
            let ord = match key.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }

    /// Runs filter, sort, skip, and limit over `records`.
    #[must_use]
    pub fn apply<'a, I>(&self, records: I) -> Vec<Record>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut matched: Vec<&Record> = records.into_iter().filter(|r| self.matches(r)).collect();
        matched.sort_by(|a, b| self.compare(a, b));
        let limit = self.limit.map_or(usize::MAX, |l| l as usize);
        matched
            .into_iter()
            .skip(self.skip as usize)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Stable textual key identifying this exact query, used for caching.
    #[must_use]
    pub fn cache_key(&self) -> String {
        // Policy is excluded: the same query under any policy shares a cache slot.
        let keyed = Self {
            cache_policy: CachePolicy::NetworkOnly,
            ..self.clone()
        };
        serde_json::to_string(&keyed).unwrap_or_else(|_| format!("{keyed:?}"))
    }
}

fn field_value(record: &Record, field: &str) -> Option<Value> {
    if field == "id" {
        return Some(Value::String(record.id.clone()));
    }
    record.get(field).cloned()
}
