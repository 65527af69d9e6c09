//! Generic tenant-scoped CRUD.
//!
//! A [`Store<E>`] is bound to a [`Scope`] at construction. With a tenant
//! bound, every statement it issues carries `AND <tenant column> = ?`, so a
//! primary key belonging to another tenant behaves exactly like a missing one.

use std::marker::PhantomData;

use domgate_core::TenantId;
use domgate_core::error::StoreError;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;

use crate::entity::{Entity, Value};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Who a store acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Tenant(TenantId),
    /// Unfiltered. Reachable only through [`Database::system`](crate::Database::system).
    System,
}

// ── Filter ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(&'static str, Value),
    IsNull(&'static str),
    Contains(&'static str, String),
}

/// Extra conditions, ordering, and paging for `list`.
///
/// Column names must be among the entity's columns; anything else is
/// rejected before a statement is built.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
    order: Option<(&'static str, Direction)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column, value.into()));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.conditions.push(Condition::IsNull(column));
        self
    }

    /// Case-insensitive substring match.
    pub fn contains(mut self, column: &'static str, needle: impl Into<String>) -> Self {
        self.conditions.push(Condition::Contains(column, needle.into()));
        self
    }

    pub fn order_by(mut self, column: &'static str) -> Self {
        self.order = Some((column, Direction::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: &'static str) -> Self {
        self.order = Some((column, Direction::Desc));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(i64::from(limit));
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(i64::from(offset));
        self
    }
}

fn check_column<E: Entity>(column: &str) -> Result<(), StoreError> {
    if E::COLUMNS.contains(&column) {
        Ok(())
    } else {
        Err(StoreError::Storage(format!("unknown column '{column}' on {}", E::TABLE)))
    }
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn tenant_clause<'s, E: Entity>(scope: &'s Scope) -> Option<(&'static str, &'s TenantId)> {
    match (scope, E::TENANT_COLUMN) {
        (Scope::Tenant(tenant), Some(column)) => Some((column, tenant)),
        _ => None,
    }
}

/// `WHERE ...` (possibly empty) plus the values to bind, tenant first.
fn where_clause<E: Entity>(scope: &Scope, filter: &Filter) -> Result<(String, Vec<Value>), StoreError> {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    if let Some((column, tenant)) = tenant_clause::<E>(scope) {
        clauses.push(format!("{column} = ?"));
        binds.push(Value::from(tenant.as_str()));
    }

    for condition in &filter.conditions {
        match condition {
            Condition::Eq(column, value) => {
                check_column::<E>(column)?;
                clauses.push(format!("{column} = ?"));
                binds.push(value.clone());
            }
            Condition::IsNull(column) => {
                check_column::<E>(column)?;
                clauses.push(format!("{column} IS NULL"));
            }
            Condition::Contains(column, needle) => {
                check_column::<E>(column)?;
                clauses.push(format!("{column} LIKE ? ESCAPE '\\'"));
                binds.push(Value::Text(format!("%{}%", escape_like(needle))));
            }
        }
    }

    if clauses.is_empty() {
        Ok((String::new(), binds))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), binds))
    }
}

fn bind(query: SqliteQuery<'_>, value: Value) -> SqliteQuery<'_> {
    match value {
        Value::Text(s) => query.bind(s),
        Value::OptText(s) => query.bind(s),
        Value::Int(i) => query.bind(i),
        Value::Bool(b) => query.bind(b),
    }
}

pub(crate) fn map_sqlx(table: &str, op: &str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() =>
        {
            StoreError::Constraint(format!("{op} {table}: {db}"))
        }
        _ => StoreError::Storage(format!("{op} {table} failed: {e}")),
    }
}

// ── Statements ───────────────────────────────────────────────────────────

async fn select<E: Entity>(
    conn: &mut SqliteConnection,
    scope: &Scope,
    filter: &Filter,
) -> Result<Vec<E>, StoreError> {
    let (where_sql, binds) = where_clause::<E>(scope, filter)?;

    let order_sql = match filter.order {
        Some((column, direction)) => {
            check_column::<E>(column)?;
            let dir = if direction == Direction::Desc { "DESC" } else { "ASC" };
            format!(" ORDER BY {column} {dir}, rowid {dir}")
        }
        None => " ORDER BY rowid ASC".to_string(),
    };

    let page_sql = match (filter.limit, filter.offset) {
        (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
        (Some(limit), None) => format!(" LIMIT {limit}"),
        (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
        (None, None) => String::new(),
    };

    let sql = format!(
        "SELECT {} FROM {}{where_sql}{order_sql}{page_sql}",
        E::COLUMNS.join(", "),
        E::TABLE
    );

    let mut query = sqlx::query(&sql);
    for value in binds {
        query = bind(query, value);
    }

    let rows = query
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx(E::TABLE, "SELECT", e))?;

    rows.iter().map(E::from_row).collect()
}

async fn count<E: Entity>(conn: &mut SqliteConnection, scope: &Scope, filter: &Filter) -> Result<u64, StoreError> {
    let (where_sql, binds) = where_clause::<E>(scope, filter)?;
    let sql = format!("SELECT COUNT(*) AS cnt FROM {}{where_sql}", E::TABLE);

    let mut query = sqlx::query(&sql);
    for value in binds {
        query = bind(query, value);
    }

    let row = query
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx(E::TABLE, "COUNT", e))?;
    let cnt: i64 = row
        .try_get("cnt")
        .map_err(|e| StoreError::Storage(format!("cnt column: {e}")))?;
    Ok(u64::try_from(cnt).unwrap_or_default())
}

/// Stamp the caller's tenant onto a row that omitted it. A row carrying a
/// different tenant is refused.
fn stamp<E: Entity>(scope: &Scope, entity: &mut E) -> Result<(), StoreError> {
    if E::TENANT_COLUMN.is_none() {
        return Ok(());
    }
    let current = entity.tenant_id().cloned();
    match scope {
        Scope::Tenant(tenant) => match current {
            Some(existing) if existing.is_unassigned() => entity.set_tenant_id(tenant.clone()),
            Some(existing) if &existing != tenant => {
                return Err(StoreError::TenantMismatch { entity: E::NAME });
            }
            _ => {}
        },
        Scope::System => {
            if current.is_none_or(|t| t.is_unassigned()) {
                return Err(StoreError::Constraint(format!("{} requires a tenant", E::NAME)));
            }
        }
    }
    Ok(())
}

async fn insert<E: Entity>(conn: &mut SqliteConnection, scope: &Scope, mut entity: E) -> Result<E, StoreError> {
    stamp(scope, &mut entity)?;

    let placeholders = vec!["?"; E::COLUMNS.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        E::TABLE,
        E::COLUMNS.join(", ")
    );

    let mut query = sqlx::query(&sql);
    for value in entity.values()? {
        query = bind(query, value);
    }

    query
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx(E::TABLE, "INSERT", e))?;

    debug!(table = E::TABLE, id = entity.id(), "Inserted row");
    Ok(entity)
}

async fn update<E: Entity>(conn: &mut SqliteConnection, scope: &Scope, entity: &E) -> Result<(), StoreError> {
    if E::IMMUTABLE {
        return Err(StoreError::Constraint(format!("{} rows are immutable", E::NAME)));
    }

    let (assignments, mut binds): (Vec<String>, Vec<Value>) = E::COLUMNS
        .iter()
        .zip(entity.values()?)
        .filter(|(column, _)| {
            **column != "id" && **column != "created_at" && Some(**column) != E::TENANT_COLUMN
        })
        .map(|(column, value)| (format!("{column} = ?"), value))
        .unzip();

    let mut sql = format!("UPDATE {} SET {} WHERE id = ?", E::TABLE, assignments.join(", "));
    binds.push(Value::from(entity.id()));
    if let Some((column, tenant)) = tenant_clause::<E>(scope) {
        sql.push_str(&format!(" AND {column} = ?"));
        binds.push(Value::from(tenant.as_str()));
    }

    let mut query = sqlx::query(&sql);
    for value in binds {
        query = bind(query, value);
    }

    let result = query
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx(E::TABLE, "UPDATE", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: E::NAME,
            id: entity.id().to_string(),
        });
    }
    Ok(())
}

async fn delete<E: Entity>(conn: &mut SqliteConnection, scope: &Scope, id: &str) -> Result<(), StoreError> {
    let mut sql = format!("DELETE FROM {} WHERE id = ?", E::TABLE);
    let tenant = tenant_clause::<E>(scope);
    if let Some((column, _)) = tenant {
        sql.push_str(&format!(" AND {column} = ?"));
    }

    let mut query = sqlx::query(&sql).bind(id.to_string());
    if let Some((_, tenant)) = tenant {
        query = query.bind(tenant.as_str().to_string());
    }

    let result = query
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx(E::TABLE, "DELETE", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: E::NAME,
            id: id.to_string(),
        });
    }
    Ok(())
}

// ── Store ────────────────────────────────────────────────────────────────

/// CRUD over one entity type within one scope.
pub struct Store<E> {
    pool: SqlitePool,
    scope: Scope,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Store<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            scope: self.scope.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Store<E> {
    pub(crate) fn new(pool: SqlitePool, scope: Scope) -> Self {
        Self {
            pool,
            scope,
            _entity: PhantomData,
        }
    }

    async fn conn(&self) -> Result<PoolConnection<Sqlite>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| StoreError::Storage(format!("Connection unavailable: {e}")))
    }

    /// Fetch by primary key; `None` when absent or outside the scope.
    pub async fn find(&self, id: &str) -> Result<Option<E>, StoreError> {
        self.first(Filter::new().eq("id", id)).await
    }

    /// Fetch by primary key; [`StoreError::NotFound`] when absent or outside the scope.
    pub async fn get(&self, id: &str) -> Result<E, StoreError> {
        self.find(id).await?.ok_or_else(|| StoreError::NotFound {
            entity: E::NAME,
            id: id.to_string(),
        })
    }

    pub async fn list(&self, filter: Filter) -> Result<Vec<E>, StoreError> {
        let mut conn = self.conn().await?;
        select(&mut conn, &self.scope, &filter).await
    }

    pub async fn first(&self, filter: Filter) -> Result<Option<E>, StoreError> {
        let mut rows = self.list(filter.limit(1)).await?;
        Ok(rows.pop())
    }

    pub async fn count(&self, filter: Filter) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        count::<E>(&mut conn, &self.scope, &filter).await
    }

    /// Insert a row, stamping the bound tenant when the row omitted it.
    pub async fn create(&self, entity: E) -> Result<E, StoreError> {
        let mut conn = self.conn().await?;
        insert(&mut conn, &self.scope, entity).await
    }

    /// Overwrite every mutable column of the row with the same id.
    pub async fn update(&self, entity: &E) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        update(&mut conn, &self.scope, entity).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        delete::<E>(&mut conn, &self.scope, id).await
    }
}

// ── Unit of work ─────────────────────────────────────────────────────────

/// A tenant-scoped transaction. Dropping it without [`UnitOfWork::commit`]
/// rolls every write back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    scope: Scope,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>, tenant: TenantId) -> Self {
        Self {
            tx,
            scope: Scope::Tenant(tenant),
        }
    }

    pub async fn create<E: Entity>(&mut self, entity: E) -> Result<E, StoreError> {
        insert(&mut self.tx, &self.scope, entity).await
    }

    pub async fn update<E: Entity>(&mut self, entity: &E) -> Result<(), StoreError> {
        update(&mut self.tx, &self.scope, entity).await
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))
    }
}
