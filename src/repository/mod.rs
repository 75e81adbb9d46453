//! Generic repository engine.
//!
//! [`Repository`] turns entity operations into registered statements run on
//! a pooled connection. Everything entity-specific (canonical field order,
//! statement table, factory, delete policy) comes from the [`Entity`] impl.
//!
//! Every operation without an `_in` suffix checks out its own connection and
//! returns it on every path, including failures. The `_in` variants run on a
//! caller-supplied connection so several writes can share one transaction:
//!
//! ```ignore
//! manager.transaction(|conn| {
//!     repository.create_in(conn, &first)?;
//!     repository.create_in(conn, &second)
//! })?;
//! ```

pub mod competition;

use crate::db::{ConnectionManager, PooledConnection, QueryKey, QueryRegistry};
use crate::error::{DbError, DbResult};
use crate::models::{RawFields, SqlValue};
use std::marker::PhantomData;
use tracing::debug;

pub use competition::{Competition, CompetitionEdit, competition_repository};

/// Per-entity policy consumed by [`Repository`].
pub trait Entity: Sized {
    /// Column holding the identifier. Must be listed in [`Entity::FIELDS`].
    const ID_FIELD: &'static str;

    /// The one canonical column order, used for binding and reading alike.
    const FIELDS: &'static [&'static str];

    /// Whether delete operations reach the database at all.
    const DELETABLE: bool = true;

    /// Statement table. `{field}` and `{id_field}` stand for column names.
    fn queries() -> &'static [(QueryKey, &'static str)];

    fn id(&self) -> &str;

    /// Current field values, keyed by column name.
    fn to_fields(&self) -> RawFields;

    /// Build an entity from a decoded row, filling missing fields with defaults.
    fn create_instance(raw: RawFields) -> DbResult<Self>;
}

/// Outcome of [`Repository::update_by_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    /// The new value was absent; no statement was sent.
    Skipped,
    Applied { rows_affected: u64 },
}

impl FieldUpdate {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// A statement ran and matched at least one row.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { rows_affected } if *rows_affected > 0)
    }
}

/// Statement runner for one entity type.
pub struct Repository<E: Entity> {
    manager: ConnectionManager,
    queries: QueryRegistry,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            queries: QueryRegistry::register(E::queries()),
            _entity: PhantomData,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }

    /// Insert `entity`, binding every field in canonical order.
    pub fn create(&self, entity: &E) -> DbResult<bool> {
        self.queries.resolve(QueryKey::Insert)?;
        let mut conn = self.manager.acquire()?;
        self.create_in(&mut conn, entity)
    }

    pub fn create_in(&self, conn: &mut PooledConnection, entity: &E) -> DbResult<bool> {
        let sql = self.queries.resolve(QueryKey::Insert)?;
        let params = entity.to_fields().ordered(E::FIELDS)?;
        let rows_affected = run_execute(conn, QueryKey::Insert, sql, &params)?;
        Ok(rows_affected > 0)
    }

    /// Every stored entity, freshly read.
    pub fn get_all(&self) -> DbResult<Vec<E>> {
        let sql = self.queries.resolve(QueryKey::GetAll)?;
        let mut conn = self.manager.acquire()?;
        let rows = run_query(&mut conn, QueryKey::GetAll, sql, &[])?;
        rows.into_iter().map(E::create_instance).collect()
    }

    pub fn get_by_id(&self, id: &str) -> DbResult<Option<E>> {
        let sql = self.queries.resolve(QueryKey::GetById)?;
        let mut conn = self.manager.acquire()?;
        let rows = run_query(&mut conn, QueryKey::GetById, sql, &[SqlValue::from(id)])?;
        rows.into_iter().next().map(E::create_instance).transpose()
    }

    /// Entities whose `field` equals `value`.
    pub fn get_by_field(&self, field: &str, value: impl Into<SqlValue>) -> DbResult<Vec<E>> {
        let template = self.queries.resolve(QueryKey::GetByField)?;
        let sql = render(template, column::<E>(field)?, E::ID_FIELD);
        let mut conn = self.manager.acquire()?;
        let rows = run_query(&mut conn, QueryKey::GetByField, &sql, &[value.into()])?;
        rows.into_iter().map(E::create_instance).collect()
    }

    /// Overwrite every non-identifier field of the stored row.
    pub fn update(&self, entity: &E) -> DbResult<bool> {
        self.queries.resolve(QueryKey::Update)?;
        let mut conn = self.manager.acquire()?;
        self.update_in(&mut conn, entity)
    }

    pub fn update_in(&self, conn: &mut PooledConnection, entity: &E) -> DbResult<bool> {
        let sql = self.queries.resolve(QueryKey::Update)?;
        let fields = entity.to_fields();
        let mut params = fields.ordered(&non_id_fields::<E>())?;
        params.extend(fields.ordered(&[E::ID_FIELD])?);
        let rows_affected = run_execute(conn, QueryKey::Update, sql, &params)?;
        Ok(rows_affected > 0)
    }

    /// Set one column of the row whose `id_field` equals `id`.
    ///
    /// An absent or NULL `value` means "leave unchanged": nothing is sent to
    /// the database and [`FieldUpdate::Skipped`] is returned.
    pub fn update_by_field(
        &self,
        id: &str,
        id_field: &str,
        field: &str,
        value: Option<SqlValue>,
    ) -> DbResult<FieldUpdate> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            debug!(id = id, field = field, "Skipping update with no value");
            return Ok(FieldUpdate::Skipped);
        };
        self.queries.resolve(QueryKey::UpdateByField)?;
        let mut conn = self.manager.acquire()?;
        self.update_by_field_in(&mut conn, id, id_field, field, Some(value))
    }

    pub fn update_by_field_in(
        &self,
        conn: &mut PooledConnection,
        id: &str,
        id_field: &str,
        field: &str,
        value: Option<SqlValue>,
    ) -> DbResult<FieldUpdate> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            debug!(id = id, field = field, "Skipping update with no value");
            return Ok(FieldUpdate::Skipped);
        };
        let template = self.queries.resolve(QueryKey::UpdateByField)?;
        let sql = render(template, column::<E>(field)?, column::<E>(id_field)?);
        let params = [value, SqlValue::from(id)];
        let rows_affected = run_execute(conn, QueryKey::UpdateByField, &sql, &params)?;
        Ok(FieldUpdate::Applied { rows_affected })
    }

    /// Delete the row with identifier `id`.
    ///
    /// Always `false` without touching the database when the entity is not
    /// deletable.
    pub fn delete_by_id(&self, id: &str) -> DbResult<bool> {
        if !E::DELETABLE {
            debug!(id = id, "Entity is not deletable");
            return Ok(false);
        }
        self.queries.resolve(QueryKey::DeleteById)?;
        let mut conn = self.manager.acquire()?;
        self.delete_by_id_in(&mut conn, id)
    }

    pub fn delete_by_id_in(&self, conn: &mut PooledConnection, id: &str) -> DbResult<bool> {
        if !E::DELETABLE {
            return Ok(false);
        }
        let sql = self.queries.resolve(QueryKey::DeleteById)?;
        let rows_affected = run_execute(conn, QueryKey::DeleteById, sql, &[SqlValue::from(id)])?;
        Ok(rows_affected > 0)
    }

    /// Delete every row whose `field` equals `value`.
    pub fn delete_by_field(&self, field: &str, value: impl Into<SqlValue>) -> DbResult<bool> {
        if !E::DELETABLE {
            debug!(field = field, "Entity is not deletable");
            return Ok(false);
        }
        self.queries.resolve(QueryKey::DeleteByField)?;
        let mut conn = self.manager.acquire()?;
        self.delete_by_field_in(&mut conn, field, value)
    }

    pub fn delete_by_field_in(
        &self,
        conn: &mut PooledConnection,
        field: &str,
        value: impl Into<SqlValue>,
    ) -> DbResult<bool> {
        if !E::DELETABLE {
            return Ok(false);
        }
        let template = self.queries.resolve(QueryKey::DeleteByField)?;
        let sql = render(template, column::<E>(field)?, E::ID_FIELD);
        let rows_affected = run_execute(conn, QueryKey::DeleteByField, &sql, &[value.into()])?;
        Ok(rows_affected > 0)
    }
}

impl<E: Entity> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<E>())
            .field("queries", &self.queries.len())
            .finish()
    }
}

/// Canonical spelling of `field`, which must be one of the entity's columns.
fn column<E: Entity>(field: &str) -> DbResult<&'static str> {
    E::FIELDS
        .iter()
        .copied()
        .find(|name| name.eq_ignore_ascii_case(field))
        .ok_or_else(|| {
            DbError::invalid_input(format!(
                "Unknown column '{}' for {}",
                field,
                std::any::type_name::<E>()
            ))
        })
}

fn non_id_fields<E: Entity>() -> Vec<&'static str> {
    E::FIELDS
        .iter()
        .copied()
        .filter(|name| *name != E::ID_FIELD)
        .collect()
}

fn render(template: &str, field: &str, id_field: &str) -> String {
    template
        .replace("{field}", field)
        .replace("{id_field}", id_field)
}

fn data_access(key: QueryKey, error: DbError) -> DbError {
    match error {
        DbError::DataAccess { .. } => error,
        other => DbError::data_access(
            format!("{} failed: {}", key, other),
            Some(Box::new(other)),
        ),
    }
}

fn run_execute(
    conn: &mut PooledConnection,
    key: QueryKey,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<u64> {
    let rows_affected = conn
        .execute(sql, params)
        .map_err(|e| data_access(key, e))?;
    debug!(
        connection_id = conn.id(),
        query_key = %key,
        rows_affected = rows_affected,
        "Statement executed"
    );
    Ok(rows_affected)
}

fn run_query(
    conn: &mut PooledConnection,
    key: QueryKey,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<Vec<RawFields>> {
    let rows = conn.query(sql, params).map_err(|e| data_access(key, e))?;
    debug!(
        connection_id = conn.id(),
        query_key = %key,
        row_count = rows.len(),
        "Query executed"
    );
    Ok(rows)
}
