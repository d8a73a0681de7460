use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use mirror_common::error::{MirrorError, MirrorResult};

/// Postgres caps a single statement at 65535 bind parameters.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// A single bindable column value. `None` binds SQL `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    BigInt(Option<i64>),
    Text(Option<String>),
    Timestamp(Option<DateTime<Utc>>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(Some(v))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        Self::BigInt(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(Some(v.to_owned()))
    }
}

impl From<Option<&str>> for SqlValue {
    fn from(v: Option<&str>) -> Self {
        Self::Text(v.map(str::to_owned))
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        Self::Timestamp(v)
    }
}

/// An entity that maps to one row of a batch upsert.
pub trait UpsertRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const CONFLICT_KEY: &'static [&'static str];

    fn values(&self) -> Vec<SqlValue>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    /// Overwrite every non-key column from `excluded`, except the preserved ones.
    UpdateAll { preserve: &'static [&'static str] },
    DoNothing,
}

/// Builds one parameterized multi-row `insert ... on conflict` statement.
#[derive(Debug, Clone)]
pub struct BatchUpsert {
    table: &'static str,
    columns: &'static [&'static str],
    conflict_key: &'static [&'static str],
    action: ConflictAction,
    returning: Option<&'static str>,
}

impl BatchUpsert {
    pub fn new(
        table: &'static str,
        columns: &'static [&'static str],
        conflict_key: &'static [&'static str],
    ) -> Self {
        Self {
            table,
            columns,
            conflict_key,
            action: ConflictAction::UpdateAll { preserve: &[] },
            returning: None,
        }
    }

    pub fn for_row<R: UpsertRow>() -> Self {
        Self::new(R::TABLE, R::COLUMNS, R::CONFLICT_KEY)
    }

    pub fn on_conflict(mut self, action: ConflictAction) -> Self {
        self.action = action;
        self
    }

    pub fn returning(mut self, column: &'static str) -> Self {
        self.returning = Some(column);
        self
    }

    /// Largest row count that fits under the bind-parameter cap.
    pub fn max_rows_per_statement(&self) -> usize {
        (MAX_BIND_PARAMS / self.columns.len().max(1)).max(1)
    }

    /// Validate every row against the column list, then render the statement.
    /// Nothing touches the database here.
    pub fn build(&self, rows: &[Vec<SqlValue>]) -> MirrorResult<QueryBuilder<'static, Postgres>> {
        if self.columns.is_empty() {
            return Err(MirrorError::Validation(format!(
                "batch upsert into {} has no columns",
                self.table
            )));
        }
        if rows.is_empty() {
            return Err(MirrorError::Validation(format!(
                "batch upsert into {} has no rows",
                self.table
            )));
        }
        if rows.len() > self.max_rows_per_statement() {
            return Err(MirrorError::Validation(format!(
                "batch upsert into {} has {} rows, statement limit is {}",
                self.table,
                rows.len(),
                self.max_rows_per_statement()
            )));
        }
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.columns.len())
        {
            return Err(MirrorError::Validation(format!(
                "row {index} for {} has {} values, expected {}",
                self.table,
                row.len(),
                self.columns.len()
            )));
        }

        let mut qb = QueryBuilder::new(format!(
            "insert into {} ({}) values ",
            self.table,
            self.columns.join(", ")
        ));

        for (index, row) in rows.iter().enumerate() {
            if index > 0 {
                qb.push(", ");
            }
            qb.push("(");
            let mut separated = qb.separated(", ");
            for value in row {
                match value.clone() {
                    SqlValue::BigInt(v) => separated.push_bind(v),
                    SqlValue::Text(v) => separated.push_bind(v),
                    SqlValue::Timestamp(v) => separated.push_bind(v),
                };
            }
            separated.push_unseparated(")");
        }

        qb.push(" on conflict (");
        qb.push(self.conflict_key.join(", "));
        qb.push(")");
        qb.push(self.conflict_clause());

        if let Some(column) = self.returning {
            qb.push(" returning ");
            qb.push(column);
        }

        Ok(qb)
    }

    /// Split `rows` into as many statements as the bind-parameter cap needs.
    pub fn build_chunked(
        &self,
        rows: &[Vec<SqlValue>],
    ) -> MirrorResult<Vec<QueryBuilder<'static, Postgres>>> {
        rows.chunks(self.max_rows_per_statement())
            .map(|chunk| self.build(chunk))
            .collect()
    }

    fn conflict_clause(&self) -> String {
        match &self.action {
            ConflictAction::DoNothing => " do nothing".to_owned(),
            ConflictAction::UpdateAll { preserve } => {
                let assignments: Vec<String> = self
                    .columns
                    .iter()
                    .filter(|c| !self.conflict_key.contains(c) && !preserve.contains(c))
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect();
                if assignments.is_empty() {
                    " do nothing".to_owned()
                } else {
                    format!(" do update set {}", assignments.join(", "))
                }
            }
        }
    }
}

/// Collect the values of a slice of entities.
pub fn rows_of<R: UpsertRow>(items: &[R]) -> Vec<Vec<SqlValue>> {
    items.iter().map(UpsertRow::values).collect()
}
