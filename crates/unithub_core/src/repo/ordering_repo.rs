//! Ordered collection manager: scoped, gap-free positions for any ordered table.
//!
//! # Responsibility
//! - Assign initial positions, renumber scopes and move rows within a scope.
//! - Keep SQL for position bookkeeping in one place for every ordered table.
//!
//! # Invariants
//! - After any committed operation the touched scope holds `1..=N`.
//! - Rows are walked by `sort_order ASC, id ASC`; id is the stable tie-break.
//! - Null scope values form one scope (`IS` comparison).
//! - Every read-then-write runs under one `IMMEDIATE` write scope, so
//!   concurrent moves on the same scope are serialized.

use crate::db::{is_busy_error, DbError, WriteScope};
use crate::model::ordering::{OrderedItem, OrderedTable, ScopeKey, ORDERED_TABLES};
use crate::repo::{ensure_schema_ready, Retryable, SchemaError, TableSpec};
use log::{info, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by ordering operations.
pub type OrderingResult<T> = Result<T, OrderingError>;

/// Errors from ordering operations.
#[derive(Debug)]
pub enum OrderingError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Another writer holds the scope; the operation can be retried wholesale.
    Conflict(DbError),
    /// Row does not exist in the ordered table.
    NotFound { table: &'static str, id: i64 },
    /// Persisted data cannot be interpreted.
    InvalidData(String),
    /// Connection is not ready.
    Schema(SchemaError),
}

impl Retryable for OrderingError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl Display for OrderingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Conflict(err) => write!(f, "ordering conflict, retry the operation: {err}"),
            Self::NotFound { table, id } => write!(f, "{table} row not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid ordering data: {message}"),
            Self::Schema(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OrderingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) | Self::Conflict(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::NotFound { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for OrderingError {
    fn from(value: rusqlite::Error) -> Self {
        if is_busy_error(&value) {
            return Self::Conflict(DbError::Sqlite(value));
        }
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SchemaError> for OrderingError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

/// Repository interface for ordered collections.
pub trait OrderingRepository {
    /// Returns the position a new row in `scope` should take (`max + 1`, or 1).
    /// Nothing is written.
    fn assign_initial_order(&self, table: OrderedTable, scope: &ScopeKey) -> OrderingResult<i64>;
    /// Renumbers one scope, or every scope present when `scope` is `None`.
    /// Returns the number of rows rewritten.
    fn fix_ordering(&self, table: OrderedTable, scope: Option<&ScopeKey>)
        -> OrderingResult<usize>;
    /// Swaps with the previous row. Returns `false` for a no-op.
    fn move_up(&self, table: OrderedTable, id: i64) -> OrderingResult<bool>;
    /// Swaps with the next row. Returns `false` for a no-op.
    fn move_down(&self, table: OrderedTable, id: i64) -> OrderingResult<bool>;
    /// Moves to `target` (clamped to `1..=N`). Returns `false` for a no-op.
    fn move_to(&self, table: OrderedTable, id: i64, target: i64) -> OrderingResult<bool>;
    /// Deletes a row and closes the gap it leaves.
    fn remove(&self, table: OrderedTable, id: i64) -> OrderingResult<()>;
    /// Re-scopes a row: appended to `scope`, old scope renumbered.
    /// Returns the row's new position.
    fn move_to_scope(&self, table: OrderedTable, id: i64, scope: &ScopeKey)
        -> OrderingResult<i64>;
    /// Lists the rows of one scope in position order.
    fn list_scope(&self, table: OrderedTable, scope: &ScopeKey)
        -> OrderingResult<Vec<OrderedItem>>;
    /// Returns a row's scope and position, if the row exists.
    fn position_of(&self, table: OrderedTable, id: i64)
        -> OrderingResult<Option<(ScopeKey, i64)>>;
}

/// SQLite-backed ordered collection manager.
pub struct SqliteOrderingRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOrderingRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> OrderingResult<Self> {
        ensure_ordering_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn swap_with_neighbour(
        &self,
        table: OrderedTable,
        id: i64,
        direction: Direction,
    ) -> OrderingResult<bool> {
        let scope = WriteScope::begin(self.conn)?;
        let Some(scope_key) = scope_of(self.conn, table, id)? else {
            scope.commit()?;
            return Ok(false);
        };

        renumber_scope(self.conn, table, &scope_key)?;
        let items = load_scope(self.conn, table, &scope_key)?;
        let index = items
            .iter()
            .position(|item| item.id == id)
            .ok_or(OrderingError::NotFound {
                table: table.table,
                id,
            })?;
        let neighbour = match direction {
            Direction::Up => index.checked_sub(1).map(|i| items[i]),
            Direction::Down => items.get(index + 1).copied(),
        };

        let moved = match neighbour {
            Some(neighbour) => {
                let current = items[index];
                set_order(self.conn, table, current.id, neighbour.sort_order)?;
                set_order(self.conn, table, neighbour.id, current.sort_order)?;
                renumber_scope(self.conn, table, &scope_key)?;
                true
            }
            None => false,
        };
        scope.commit()?;

        info!(
            "event=ordering_move module=repo status=ok table={} id={} direction={} moved={}",
            table.table,
            id,
            direction.as_str(),
            moved
        );
        Ok(moved)
    }
}

impl OrderingRepository for SqliteOrderingRepository<'_> {
    fn assign_initial_order(&self, table: OrderedTable, scope: &ScopeKey) -> OrderingResult<i64> {
        next_order(self.conn, table, scope)
    }

    fn fix_ordering(
        &self,
        table: OrderedTable,
        scope: Option<&ScopeKey>,
    ) -> OrderingResult<usize> {
        let write = WriteScope::begin(self.conn)?;
        let written = match scope {
            Some(scope) => renumber_scope(self.conn, table, scope)?,
            None => {
                let mut total = 0;
                for scope in distinct_scopes(self.conn, table)? {
                    total += renumber_scope(self.conn, table, &scope)?;
                }
                total
            }
        };
        write.commit()?;

        info!(
            "event=ordering_fix module=repo status=ok table={} scoped={} rows_written={}",
            table.table,
            scope.is_some(),
            written
        );
        Ok(written)
    }

    fn move_up(&self, table: OrderedTable, id: i64) -> OrderingResult<bool> {
        self.swap_with_neighbour(table, id, Direction::Up)
    }

    fn move_down(&self, table: OrderedTable, id: i64) -> OrderingResult<bool> {
        self.swap_with_neighbour(table, id, Direction::Down)
    }

    fn move_to(&self, table: OrderedTable, id: i64, target: i64) -> OrderingResult<bool> {
        let write = WriteScope::begin(self.conn)?;
        let Some(scope_key) = scope_of(self.conn, table, id)? else {
            write.commit()?;
            return Ok(false);
        };

        renumber_scope(self.conn, table, &scope_key)?;
        let items = load_scope(self.conn, table, &scope_key)?;
        let current = items
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.sort_order)
            .ok_or(OrderingError::NotFound {
                table: table.table,
                id,
            })?;
        let target = target.clamp(1, items.len() as i64);
        if target == current {
            write.commit()?;
            return Ok(false);
        }

        let (filter, mut values) = scope_filter(table, &scope_key);
        let shift_sql = if target < current {
            format!(
                "UPDATE {} SET sort_order = sort_order + 1
                 WHERE {filter} AND sort_order >= ? AND sort_order < ?;",
                table.table
            )
        } else {
            format!(
                "UPDATE {} SET sort_order = sort_order - 1
                 WHERE {filter} AND sort_order > ? AND sort_order <= ?;",
                table.table
            )
        };
        let (low, high) = if target < current {
            (target, current)
        } else {
            (current, target)
        };
        values.push(Value::Integer(low));
        values.push(Value::Integer(high));
        self.conn.execute(&shift_sql, params_from_iter(values))?;
        set_order(self.conn, table, id, target)?;
        renumber_scope(self.conn, table, &scope_key)?;
        write.commit()?;

        info!(
            "event=ordering_move module=repo status=ok table={} id={} from={} to={}",
            table.table, id, current, target
        );
        Ok(true)
    }

    fn remove(&self, table: OrderedTable, id: i64) -> OrderingResult<()> {
        let write = WriteScope::begin(self.conn)?;
        let scope_key = scope_of(self.conn, table, id)?.ok_or(OrderingError::NotFound {
            table: table.table,
            id,
        })?;
        self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1;", table.table),
            [id],
        )?;
        renumber_scope(self.conn, table, &scope_key)?;
        write.commit()?;

        info!(
            "event=ordering_remove module=repo status=ok table={} id={}",
            table.table, id
        );
        Ok(())
    }

    fn move_to_scope(
        &self,
        table: OrderedTable,
        id: i64,
        scope: &ScopeKey,
    ) -> OrderingResult<i64> {
        let write = WriteScope::begin(self.conn)?;
        let position = reassign_scope(self.conn, table, id, scope)?;
        write.commit()?;
        Ok(position)
    }

    fn list_scope(
        &self,
        table: OrderedTable,
        scope: &ScopeKey,
    ) -> OrderingResult<Vec<OrderedItem>> {
        load_scope(self.conn, table, scope)
    }

    fn position_of(
        &self,
        table: OrderedTable,
        id: i64,
    ) -> OrderingResult<Option<(ScopeKey, i64)>> {
        let Some(scope) = scope_of(self.conn, table, id)? else {
            return Ok(None);
        };
        let order: i64 = self.conn.query_row(
            &format!("SELECT sort_order FROM {} WHERE id = ?1;", table.table),
            [id],
            |row| row.get(0),
        )?;
        Ok(Some((scope, order)))
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Scope columns paired with values, or none when `scope` does not fit the
/// table declaration (treated as global ordering).
fn resolve_scope(table: OrderedTable, scope: &ScopeKey) -> Vec<(&'static str, Option<i64>)> {
    if !scope.matches(table) {
        warn!(
            "event=ordering_scope module=repo status=fallback table={} expected_columns={} got_values={}",
            table.table,
            table.scope_columns.len(),
            scope.values().len()
        );
        return Vec::new();
    }
    table
        .scope_columns
        .iter()
        .copied()
        .zip(scope.values().iter().copied())
        .collect()
}

/// SQL predicate selecting `scope` plus its positional parameters.
fn scope_filter(table: OrderedTable, scope: &ScopeKey) -> (String, Vec<Value>) {
    let resolved = resolve_scope(table, scope);
    if resolved.is_empty() {
        return ("1 = 1".to_string(), Vec::new());
    }
    let filter = resolved
        .iter()
        .map(|(column, _)| format!("{column} IS ?"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let values = resolved.into_iter().map(|(_, value)| Value::from(value)).collect();
    (filter, values)
}

/// Returns `max(sort_order) + 1` within `scope`, or 1 for an empty scope.
pub(crate) fn next_order(
    conn: &Connection,
    table: OrderedTable,
    scope: &ScopeKey,
) -> OrderingResult<i64> {
    let (filter, values) = scope_filter(table, scope);
    let next = conn.query_row(
        &format!(
            "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM {} WHERE {filter};",
            table.table
        ),
        params_from_iter(values),
        |row| row.get(0),
    )?;
    Ok(next)
}

/// Rewrites `scope` to `1..=N`, touching only rows whose position changed.
pub(crate) fn renumber_scope(
    conn: &Connection,
    table: OrderedTable,
    scope: &ScopeKey,
) -> OrderingResult<usize> {
    let items = load_scope(conn, table, scope)?;
    let mut written = 0;
    for (index, item) in items.iter().enumerate() {
        let expected = index as i64 + 1;
        if item.sort_order != expected {
            set_order(conn, table, item.id, expected)?;
            written += 1;
        }
    }
    Ok(written)
}

/// Moves `id` into `scope` at the end and closes the gap in its old scope.
pub(crate) fn reassign_scope(
    conn: &Connection,
    table: OrderedTable,
    id: i64,
    scope: &ScopeKey,
) -> OrderingResult<i64> {
    let old_scope = scope_of(conn, table, id)?.ok_or(OrderingError::NotFound {
        table: table.table,
        id,
    })?;
    let resolved = resolve_scope(table, scope);
    if resolved.is_empty() || old_scope == *scope {
        let current: i64 = conn.query_row(
            &format!("SELECT sort_order FROM {} WHERE id = ?1;", table.table),
            [id],
            |row| row.get(0),
        )?;
        return Ok(current);
    }

    let position = next_order(conn, table, scope)?;
    let assignments = resolved
        .iter()
        .map(|(column, _)| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut values: Vec<Value> = resolved
        .into_iter()
        .map(|(_, value)| Value::from(value))
        .collect();
    values.push(Value::Integer(position));
    values.push(Value::Integer(id));
    conn.execute(
        &format!(
            "UPDATE {} SET {assignments}, sort_order = ? WHERE id = ?;",
            table.table
        ),
        params_from_iter(values),
    )?;
    renumber_scope(conn, table, &old_scope)?;

    info!(
        "event=ordering_rescope module=repo status=ok table={} id={} position={}",
        table.table, id, position
    );
    Ok(position)
}

/// Loads the scope a row belongs to.
pub(crate) fn scope_of(
    conn: &Connection,
    table: OrderedTable,
    id: i64,
) -> OrderingResult<Option<ScopeKey>> {
    if table.is_global() {
        let exists: Option<i64> = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE id = ?1;", table.table),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        return Ok(exists.map(|_| ScopeKey::global()));
    }

    let columns = table.scope_columns.join(", ");
    let values = conn
        .query_row(
            &format!("SELECT {columns} FROM {} WHERE id = ?1;", table.table),
            [id],
            |row| {
                (0..table.scope_columns.len())
                    .map(|index| row.get::<_, Option<i64>>(index))
                    .collect::<rusqlite::Result<Vec<_>>>()
            },
        )
        .optional()?;
    Ok(values.map(ScopeKey))
}

fn load_scope(
    conn: &Connection,
    table: OrderedTable,
    scope: &ScopeKey,
) -> OrderingResult<Vec<OrderedItem>> {
    let (filter, values) = scope_filter(table, scope);
    let mut stmt = conn.prepare(&format!(
        "SELECT id, sort_order FROM {} WHERE {filter} ORDER BY sort_order ASC, id ASC;",
        table.table
    ))?;
    let mut rows = stmt.query(params_from_iter(values))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(OrderedItem {
            id: row.get(0)?,
            sort_order: row.get(1)?,
        });
    }
    Ok(items)
}

fn distinct_scopes(conn: &Connection, table: OrderedTable) -> OrderingResult<Vec<ScopeKey>> {
    if table.is_global() {
        return Ok(vec![ScopeKey::global()]);
    }
    let columns = table.scope_columns.join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {columns} FROM {} ORDER BY {columns};",
        table.table
    ))?;
    let mut rows = stmt.query([])?;
    let mut scopes = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(table.scope_columns.len());
        for index in 0..table.scope_columns.len() {
            values.push(row.get::<_, Option<i64>>(index)?);
        }
        scopes.push(ScopeKey(values));
    }
    Ok(scopes)
}

fn set_order(conn: &Connection, table: OrderedTable, id: i64, order: i64) -> OrderingResult<()> {
    conn.execute(
        &format!("UPDATE {} SET sort_order = ?2 WHERE id = ?1;", table.table),
        [id, order],
    )?;
    Ok(())
}

fn ensure_ordering_connection_ready(conn: &Connection) -> Result<(), SchemaError> {
    let specs: Vec<TableSpec> = ORDERED_TABLES
        .iter()
        .map(|table| TableSpec {
            name: table.table,
            columns: &["id", "sort_order"],
        })
        .collect();
    ensure_schema_ready(conn, &specs)?;
    for table in ORDERED_TABLES {
        let scope_spec = TableSpec {
            name: table.table,
            columns: table.scope_columns,
        };
        ensure_schema_ready(conn, std::slice::from_ref(&scope_spec))?;
    }
    Ok(())
}
