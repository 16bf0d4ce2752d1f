//! Generic filter, sort and pagination over stored records.
//!
//! Entities opt in by implementing [`Queryable`], which hands out a
//! [`PropertyTable`]: a map from property name to a getter returning a
//! dynamically typed [`Value`]. The engine never fails while evaluating:
//!
//! - a filter whose property cannot be resolved or compared matches nothing
//! - a sort whose values cannot be resolved or ordered keeps the input order
//! - a page past the end is empty
//!
//! Malformed input is rejected earlier, by the constructors of
//! [`PageRequest`], [`Sort`] and the `FromStr` impls of the enums.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::QueryError;

/// Dynamically typed property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Equality with numeric widening between `Int` and `Float`.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => self == other,
        }
    }

    /// Ordinal comparison. `None` when the kinds are not mutually orderable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn order_class(&self) -> Option<u8> {
        match self {
            Value::Int(_) => Some(0),
            Value::Float(f) if !f.is_nan() => Some(0),
            Value::Text(_) => Some(1),
            Value::Timestamp(_) => Some(2),
            Value::Bool(_) => Some(3),
            Value::Float(_) | Value::Null | Value::List(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<&[String]> for Value {
    fn from(v: &[String]) -> Self {
        Value::List(v.iter().map(|s| Value::Text(s.clone())).collect())
    }
}

pub type Getter<T> = fn(&T) -> Value;

/// Named getters of one entity type.
pub struct PropertyTable<T: 'static> {
    entity: &'static str,
    getters: HashMap<&'static str, Getter<T>>,
}

impl<T: 'static> PropertyTable<T> {
    pub fn new(entity: &'static str) -> Self {
        Self {
            entity,
            getters: HashMap::new(),
        }
    }

    /// Register a getter under `name`.
    pub fn with(mut self, name: &'static str, getter: Getter<T>) -> Self {
        self.getters.insert(name, getter);
        self
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn contains(&self, property: &str) -> bool {
        self.getters.contains_key(property)
    }

    /// Registered property names, sorted.
    pub fn properties(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.getters.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn resolve(&self, item: &T, property: &str) -> Result<Value, QueryError> {
        self.getters
            .get(property)
            .map(|getter| getter(item))
            .ok_or_else(|| QueryError::UnknownProperty {
                property: property.to_string(),
                entity: self.entity,
            })
    }
}

impl<T: 'static> std::fmt::Debug for PropertyTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyTable")
            .field("entity", &self.entity)
            .field("properties", &self.properties())
            .finish()
    }
}

/// An entity the query engine can filter and sort.
pub trait Queryable: Sized + 'static {
    fn property_table() -> &'static PropertyTable<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    Contains,
    StartsWith,
    EndsWith,
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EQUALS" => Ok(Operator::Equals),
            "NOT_EQUALS" => Ok(Operator::NotEquals),
            "GREATER_THAN" => Ok(Operator::GreaterThan),
            "GREATER_THAN_OR_EQUALS" => Ok(Operator::GreaterThanOrEquals),
            "LESS_THAN" => Ok(Operator::LessThan),
            "LESS_THAN_OR_EQUALS" => Ok(Operator::LessThanOrEquals),
            "CONTAINS" => Ok(Operator::Contains),
            "STARTS_WITH" => Ok(Operator::StartsWith),
            "ENDS_WITH" => Ok(Operator::EndsWith),
            _ => Err(QueryError::UnknownOperator(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Logic {
    And,
    Or,
}

impl FromStr for Logic {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Logic::And),
            "OR" => Ok(Logic::Or),
            _ => Err(QueryError::UnknownLogic(s.to_string())),
        }
    }
}

/// Single property predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub property: String,
    pub value: Value,
    pub operator: Operator,
}

impl Filter {
    fn matches<T: Queryable>(&self, item: &T) -> bool {
        let field = match T::property_table().resolve(item, &self.property) {
            Ok(value) => value,
            Err(_) => return false,
        };
        if field.is_null() {
            return false;
        }

        let target = &self.value;
        match self.operator {
            Operator::Equals => field.loose_eq(target),
            Operator::NotEquals => !field.loose_eq(target),
            Operator::GreaterThan => field.compare(target) == Some(Ordering::Greater),
            Operator::GreaterThanOrEquals => {
                matches!(field.compare(target), Some(Ordering::Greater | Ordering::Equal))
            }
            Operator::LessThan => field.compare(target) == Some(Ordering::Less),
            Operator::LessThanOrEquals => {
                matches!(field.compare(target), Some(Ordering::Less | Ordering::Equal))
            }
            Operator::Contains => match (&field, target.as_text()) {
                (Value::Text(s), Some(v)) => s.to_lowercase().contains(&v.to_lowercase()),
                (Value::List(items), _) => items.iter().any(|i| i.loose_eq(target)),
                _ => false,
            },
            Operator::StartsWith => text_pair(&field, target)
                .map(|(s, v)| s.starts_with(&v))
                .unwrap_or(false),
            Operator::EndsWith => text_pair(&field, target)
                .map(|(s, v)| s.ends_with(&v))
                .unwrap_or(false),
        }
    }
}

fn text_pair(field: &Value, target: &Value) -> Option<(String, String)> {
    Some((field.as_text()?.to_lowercase(), target.as_text()?.to_lowercase()))
}

/// Filter tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FilterNode {
    /// Matches everything.
    #[default]
    Unfiltered,
    Filter(Filter),
    Group { nodes: Vec<FilterNode>, logic: Logic },
}

impl FilterNode {
    pub fn filter(property: impl Into<String>, value: impl Into<Value>, operator: Operator) -> Self {
        FilterNode::Filter(Filter {
            property: property.into(),
            value: value.into(),
            operator,
        })
    }

    pub fn and(nodes: Vec<FilterNode>) -> Self {
        FilterNode::Group {
            nodes,
            logic: Logic::And,
        }
    }

    pub fn or(nodes: Vec<FilterNode>) -> Self {
        FilterNode::Group {
            nodes,
            logic: Logic::Or,
        }
    }

    /// Evaluate the tree against one item. An empty AND group matches
    /// everything; an empty OR group matches nothing.
    pub fn matches<T: Queryable>(&self, item: &T) -> bool {
        match self {
            FilterNode::Unfiltered => true,
            FilterNode::Filter(filter) => filter.matches(item),
            FilterNode::Group {
                nodes,
                logic: Logic::And,
            } => nodes.iter().all(|n| n.matches(item)),
            FilterNode::Group {
                nodes,
                logic: Logic::Or,
            } => nodes.iter().any(|n| n.matches(item)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Asc,
    Desc,
}

impl FromStr for Direction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(Direction::Asc),
            "DESC" => Ok(Direction::Desc),
            _ => Err(QueryError::UnknownDirection(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Sort {
    #[default]
    Unsorted,
    By {
        property: String,
        direction: Direction,
    },
}

impl Sort {
    pub fn by(property: impl Into<String>, direction: Direction) -> Result<Self, QueryError> {
        let property = property.into();
        if property.trim().is_empty() {
            return Err(QueryError::BlankSortProperty);
        }
        Ok(Sort::By { property, direction })
    }

    /// Parse `"property,direction"`, e.g. `"duration,desc"`.
    pub fn parse(value: &str) -> Result<Self, QueryError> {
        let mut parts = value.split(',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(property), Some(direction), None) => {
                Sort::by(property.trim(), direction.parse()?)
            }
            _ => Err(QueryError::MalformedSort(value.to_string())),
        }
    }

    pub fn is_sorted(&self) -> bool {
        matches!(self, Sort::By { .. })
    }
}

/// Sort by one property. Nulls come first ascending and last descending.
///
/// Returns `items` unchanged if the property is unknown or the values are not
/// mutually orderable.
pub fn sort<'a, T: Queryable>(items: Vec<&'a T>, sort: &Sort) -> Vec<&'a T> {
    let Sort::By { property, direction } = sort else {
        return items;
    };

    let table = T::property_table();
    let keys: Result<Vec<Value>, QueryError> =
        items.iter().map(|item| table.resolve(item, property)).collect();
    let keys = match keys {
        Ok(keys) => keys,
        Err(e) => {
            tracing::debug!(error = %e, "Sort skipped");
            return items;
        }
    };

    let mut classes = keys.iter().filter(|k| !k.is_null()).map(Value::order_class);
    if let Some(first) = classes.next() {
        if first.is_none() || classes.any(|c| c != first) {
            tracing::debug!(error = %QueryError::Incomparable(property.clone()), "Sort skipped");
            return items;
        }
    }

    let mut keyed: Vec<(Value, &'a T)> = keys.into_iter().zip(items.iter().copied()).collect();
    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
        };
        match direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    });
    keyed.into_iter().map(|(_, item)| item).collect()
}

/// Page, sort and filter parameters of a `find_all` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    page_number: usize,
    page_size: usize,
    sort: Sort,
    filter: FilterNode,
}

impl PageRequest {
    pub fn new(page_number: usize, page_size: usize) -> Result<Self, QueryError> {
        if page_size < 1 {
            return Err(QueryError::InvalidPageSize);
        }
        Ok(Self {
            page_number,
            page_size,
            sort: Sort::Unsorted,
            filter: FilterNode::Unfiltered,
        })
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = filter;
        self
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn filter(&self) -> &FilterNode {
        &self.filter
    }

    fn bounds(&self, len: usize) -> Option<(usize, usize)> {
        let start = self.page_number.checked_mul(self.page_size)?;
        if start >= len {
            return None;
        }
        Some((start, start.saturating_add(self.page_size).min(len)))
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse<T> {
    content: Vec<T>,
    page: usize,
    size: usize,
    total_elements: usize,
}

impl<T> PageResponse<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: usize) -> Self {
        Self {
            content,
            page: request.page_number,
            size: request.page_size,
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn total_elements(&self) -> usize {
        self.total_elements
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// `ceil(total / size)`, never less than 1.
    pub fn total_pages(&self) -> usize {
        if self.size == 0 {
            return 1;
        }
        self.total_elements.div_ceil(self.size).max(1)
    }

    pub fn has_previous(&self) -> bool {
        self.page > 0
    }

    pub fn has_next(&self) -> bool {
        self.page.saturating_add(1) < self.total_pages()
    }

    pub fn is_first(&self) -> bool {
        !self.has_previous()
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageView<'a, T> {
    content: &'a [T],
    total_elements: usize,
    total_pages: usize,
    number: usize,
    size: usize,
    first: bool,
    last: bool,
}

impl<T: Serialize> Serialize for PageResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PageView {
            content: &self.content,
            total_elements: self.total_elements,
            total_pages: self.total_pages(),
            number: self.page,
            size: self.size,
            first: self.is_first(),
            last: self.is_last(),
        }
        .serialize(serializer)
    }
}

/// Filter, sort and page `items`.
pub fn find_all<T: Queryable + Clone>(items: &[T], request: &PageRequest) -> PageResponse<T> {
    find_all_refs(items, request)
}

/// Like [`find_all`] over borrowed items. Only the returned page is cloned.
pub fn find_all_refs<'a, T, I>(items: I, request: &PageRequest) -> PageResponse<T>
where
    T: Queryable + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let matched: Vec<&T> = match request.filter() {
        FilterNode::Unfiltered => items.into_iter().collect(),
        filter => items.into_iter().filter(|item| filter.matches(*item)).collect(),
    };

    let sorted = sort(matched, request.sort());
    let total = sorted.len();
    let content = match request.bounds(total) {
        Some((start, end)) => sorted[start..end].iter().map(|item| (*item).clone()).collect(),
        None => Vec::new(),
    };

    PageResponse::new(content, request, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        name: &'static str,
        score: Option<i64>,
        tags: Vec<String>,
        ratio: f64,
    }

    static ROW_PROPERTIES: Lazy<PropertyTable<Row>> = Lazy::new(|| {
        PropertyTable::<Row>::new("Row")
            .with("name", |r| Value::from(r.name))
            .with("score", |r| Value::from(r.score))
            .with("tags", |r| Value::from(r.tags.as_slice()))
            .with("ratio", |r| Value::from(r.ratio))
    });

    impl Queryable for Row {
        fn property_table() -> &'static PropertyTable<Self> {
            &ROW_PROPERTIES
        }
    }

    fn row(name: &'static str, score: Option<i64>, tags: &[&str]) -> Row {
        Row {
            name,
            score,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ratio: 0.5,
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            row("Alpha", Some(30), &["a", "x"]),
            row("beta", None, &["b"]),
            row("Gamma", Some(10), &["x"]),
            row("delta", Some(20), &[]),
        ]
    }

    fn names(items: &[Row]) -> Vec<&'static str> {
        items.iter().map(|r| r.name).collect()
    }

    fn matching(filter: FilterNode) -> Vec<&'static str> {
        let data = rows();
        let request = PageRequest::new(0, 100).unwrap().with_filter(filter);
        names(find_all(&data, &request).content())
    }

    #[test]
    fn test_unfiltered_returns_everything() {
        assert_eq!(matching(FilterNode::Unfiltered).len(), 4);
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            matching(FilterNode::filter("score", 20i64, Operator::GreaterThan)),
            vec!["Alpha"]
        );
        assert_eq!(
            matching(FilterNode::filter("score", 20i64, Operator::GreaterThanOrEquals)),
            vec!["Alpha", "delta"]
        );
        assert_eq!(
            matching(FilterNode::filter("score", 20.0, Operator::LessThan)),
            vec!["Gamma"]
        );
        assert_eq!(
            matching(FilterNode::filter("score", 20i64, Operator::LessThanOrEquals)),
            vec!["Gamma", "delta"]
        );
    }

    #[test]
    fn test_null_field_never_matches() {
        // beta has no score, so it matches neither EQUALS nor NOT_EQUALS
        assert_eq!(
            matching(FilterNode::filter("score", 10i64, Operator::NotEquals)),
            vec!["Alpha", "delta"]
        );
    }

    #[test]
    fn test_text_operators_case_insensitive() {
        assert_eq!(
            matching(FilterNode::filter("name", "ALP", Operator::StartsWith)),
            vec!["Alpha"]
        );
        assert_eq!(
            matching(FilterNode::filter("name", "TA", Operator::EndsWith)),
            vec!["beta", "delta"]
        );
        assert_eq!(
            matching(FilterNode::filter("name", "mM", Operator::Contains)),
            vec!["Gamma"]
        );
        // equality is exact
        assert!(matching(FilterNode::filter("name", "alpha", Operator::Equals)).is_empty());
    }

    #[test]
    fn test_contains_on_list_is_membership() {
        assert_eq!(
            matching(FilterNode::filter("tags", "x", Operator::Contains)),
            vec!["Alpha", "Gamma"]
        );
    }

    #[test]
    fn test_unknown_property_or_type_mismatch_fails_closed() {
        assert!(matching(FilterNode::filter("missing", 1i64, Operator::Equals)).is_empty());
        assert!(matching(FilterNode::filter("name", 1i64, Operator::GreaterThan)).is_empty());
        assert!(matching(FilterNode::filter("score", "x", Operator::StartsWith)).is_empty());
    }

    #[test]
    fn test_groups() {
        let contradictory = FilterNode::and(vec![
            FilterNode::filter("score", 10i64, Operator::Equals),
            FilterNode::filter("score", 30i64, Operator::Equals),
        ]);
        assert!(matching(contradictory).is_empty());

        let union = FilterNode::or(vec![
            FilterNode::filter("score", 10i64, Operator::Equals),
            FilterNode::filter("score", 30i64, Operator::Equals),
        ]);
        assert_eq!(matching(union), vec!["Alpha", "Gamma"]);

        assert_eq!(matching(FilterNode::and(vec![])).len(), 4);
        assert!(matching(FilterNode::or(vec![])).is_empty());

        let nested = FilterNode::and(vec![
            FilterNode::filter("tags", "x", Operator::Contains),
            FilterNode::or(vec![
                FilterNode::filter("name", "gam", Operator::StartsWith),
                FilterNode::filter("missing", 1i64, Operator::Equals),
            ]),
        ]);
        assert_eq!(matching(nested), vec!["Gamma"]);
    }

    #[test]
    fn test_sort_nulls_first_ascending_last_descending() {
        let data = rows();
        let asc = PageRequest::new(0, 10)
            .unwrap()
            .with_sort(Sort::by("score", Direction::Asc).unwrap());
        assert_eq!(
            names(find_all(&data, &asc).content()),
            vec!["beta", "Gamma", "delta", "Alpha"]
        );

        let desc = PageRequest::new(0, 10)
            .unwrap()
            .with_sort(Sort::by("score", Direction::Desc).unwrap());
        assert_eq!(
            names(find_all(&data, &desc).content()),
            vec!["Alpha", "delta", "Gamma", "beta"]
        );
    }

    #[test]
    fn test_sort_failure_keeps_original_order() {
        let data = rows();
        let unknown = PageRequest::new(0, 10)
            .unwrap()
            .with_sort(Sort::by("missing", Direction::Asc).unwrap());
        assert_eq!(names(find_all(&data, &unknown).content()), names(&data));

        let lists = PageRequest::new(0, 10)
            .unwrap()
            .with_sort(Sort::by("tags", Direction::Desc).unwrap());
        assert_eq!(names(find_all(&data, &lists).content()), names(&data));
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let data = rows();
        let request = PageRequest::new(0, 10)
            .unwrap()
            .with_sort(Sort::by("ratio", Direction::Desc).unwrap());
        assert_eq!(names(find_all(&data, &request).content()), names(&data));
    }

    #[test]
    fn test_paging() {
        let data = rows();
        let first = find_all(&data, &PageRequest::new(0, 3).unwrap());
        assert_eq!(first.content().len(), 3);
        assert_eq!(first.total_elements(), 4);
        assert_eq!(first.total_pages(), 2);
        assert!(first.is_first());
        assert!(first.has_next());

        let second = find_all(&data, &PageRequest::new(1, 3).unwrap());
        assert_eq!(names(second.content()), vec!["delta"]);
        assert!(second.is_last());
        assert!(second.has_previous());

        let beyond = find_all(&data, &PageRequest::new(7, 3).unwrap());
        assert!(beyond.content().is_empty());
        assert!(!beyond.has_next());
        assert_eq!(beyond.total_elements(), 4);
    }

    #[test]
    fn test_last_possible_page_number() {
        let page = find_all(&rows(), &PageRequest::new(usize::MAX, 1).unwrap());
        assert!(page.content().is_empty());
        assert_eq!(page.total_pages(), 4);
        assert!(!page.has_next());
        assert!(page.is_last());
        assert!(page.has_previous());
    }

    #[test]
    fn test_total_pages_minimum_one() {
        let empty: Vec<Row> = Vec::new();
        let page = find_all(&empty, &PageRequest::new(0, 5).unwrap());
        assert_eq!(page.total_pages(), 1);
        assert!(page.is_first());
        assert!(page.is_last());
    }

    #[test]
    fn test_boundary_validation() {
        assert_eq!(PageRequest::new(0, 0), Err(QueryError::InvalidPageSize));
        assert_eq!(Sort::by("  ", Direction::Asc), Err(QueryError::BlankSortProperty));
        assert_eq!(
            Sort::parse("duration,desc"),
            Ok(Sort::By {
                property: "duration".into(),
                direction: Direction::Desc
            })
        );
        assert_eq!(
            Sort::parse("duration"),
            Err(QueryError::MalformedSort("duration".into()))
        );
        assert_eq!(
            Sort::parse("duration,sideways"),
            Err(QueryError::UnknownDirection("sideways".into()))
        );
        assert_eq!("not_equals".parse::<Operator>(), Ok(Operator::NotEquals));
        assert!("LIKE".parse::<Operator>().is_err());
        assert_eq!("or".parse::<Logic>(), Ok(Logic::Or));
    }

    #[test]
    fn test_page_response_serialization() {
        let data = rows();
        let page = find_all(&data, &PageRequest::new(0, 2).unwrap());
        let names: Vec<&str> = page.content().iter().map(|r| r.name).collect();
        let json = serde_json::to_value(PageResponse::new(names, &PageRequest::new(0, 2).unwrap(), 4))
            .unwrap();
        assert_eq!(json["totalPages"], 2);
        assert_eq!(json["first"], true);
        assert_eq!(json["last"], false);
        assert_eq!(json["content"][0], "Alpha");
    }
}
