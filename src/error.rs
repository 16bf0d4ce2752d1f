//! Error types.

use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("duration buckets must contain at least one boundary")]
    EmptyDurationBuckets,

    #[error("duration buckets must contain at most {max} distinct boundaries, got {count}")]
    TooManyDurationBuckets { count: usize, max: usize },

    #[error("duration bucket boundaries must be positive, got {0}")]
    NonPositiveDurationBucket(i64),

    #[error("N+1 repeat threshold must be at least 2, got {0}")]
    NPlusOneThresholdTooLow(usize),
}

/// Errors raised while building or evaluating a query.
///
/// Only the constructors at the query boundary surface these to callers.
/// Inside the engine a failed property lookup degrades to "no match" for
/// filters and to the original order for sorts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("page size must be at least 1")]
    InvalidPageSize,

    #[error("sort property must not be blank")]
    BlankSortProperty,

    #[error("can't extract property and sort direction from `{0}`")]
    MalformedSort(String),

    #[error("unknown filter operator `{0}`")]
    UnknownOperator(String),

    #[error("unknown filter group logic `{0}`")]
    UnknownLogic(String),

    #[error("unknown sort direction `{0}`")]
    UnknownDirection(String),

    #[error("unknown property `{property}` on {entity}")]
    UnknownProperty {
        property: String,
        entity: &'static str,
    },

    #[error("values of property `{0}` are not comparable")]
    Incomparable(String),
}

/// Error returned by a transaction or SQL log listener.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;
