//! Statement shape extraction used when reporting repeated query patterns.

use once_cell::sync::Lazy;
use regex::Regex;

/// Leading SQL operation of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl SqlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::Select => "SELECT",
            SqlOperation::Insert => "INSERT",
            SqlOperation::Update => "UPDATE",
            SqlOperation::Delete => "DELETE",
            SqlOperation::Other => "QUERY",
        }
    }

    /// Classify a statement by its first keyword. CTEs count as selects.
    pub fn of(sql: &str) -> Self {
        let keyword: String = sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" => SqlOperation::Select,
            "INSERT" => SqlOperation::Insert,
            "UPDATE" => SqlOperation::Update,
            "DELETE" => SqlOperation::Delete,
            _ => SqlOperation::Other,
        }
    }
}

impl std::fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static FROM_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bFROM\s+[`"\[]?(\w+)[`"\]]?"#).unwrap());

static INSERT_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bINSERT\s+INTO\s+[`"\[]?(\w+)[`"\]]?"#).unwrap());

static UPDATE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bUPDATE\s+[`"\[]?(\w+)[`"\]]?"#).unwrap());

/// Operation and primary table of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementShape {
    pub operation: SqlOperation,
    pub table: Option<String>,
}

impl StatementShape {
    pub fn parse(sql: &str) -> Self {
        let operation = SqlOperation::of(sql);
        let regex = match operation {
            SqlOperation::Select | SqlOperation::Delete => Some(&*FROM_TABLE),
            SqlOperation::Insert => Some(&*INSERT_TABLE),
            SqlOperation::Update => Some(&*UPDATE_TABLE),
            SqlOperation::Other => None,
        };
        let table = regex
            .and_then(|r| r.captures(sql))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase());

        Self { operation, table }
    }
}

impl std::fmt::Display for StatementShape {
    /// `SELECT posts`, or just the operation when the table is unknown.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{} {}", self.operation, table),
            None => write!(f, "{}", self.operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_of() {
        assert_eq!(SqlOperation::of("  select 1"), SqlOperation::Select);
        assert_eq!(
            SqlOperation::of("WITH cte AS (SELECT 1) SELECT * FROM cte"),
            SqlOperation::Select
        );
        assert_eq!(SqlOperation::of("insert into t values (1)"), SqlOperation::Insert);
        assert_eq!(SqlOperation::of("UPDATE t SET a = 1"), SqlOperation::Update);
        assert_eq!(SqlOperation::of("delete from t"), SqlOperation::Delete);
        assert_eq!(SqlOperation::of("COMMIT"), SqlOperation::Other);
    }

    #[test]
    fn test_shape_tables() {
        let shape = StatementShape::parse(r#"SELECT * FROM "Users" WHERE id = 1"#);
        assert_eq!(shape.table.as_deref(), Some("users"));
        assert_eq!(shape.to_string(), "SELECT users");

        let shape = StatementShape::parse("insert into grades (student_id) values ($1)");
        assert_eq!(shape.to_string(), "INSERT grades");

        let shape = StatementShape::parse("update students set name=? where id=?");
        assert_eq!(shape.to_string(), "UPDATE students");

        let shape = StatementShape::parse("DELETE FROM assignments WHERE id = $1");
        assert_eq!(shape.to_string(), "DELETE assignments");

        assert_eq!(StatementShape::parse("ROLLBACK").to_string(), "QUERY");
    }
}
