//! Per-entity registry of parameterized statements.
//!
//! Each repository owns one [`QueryRegistry`], built once from the entity's
//! static statement table and never mutated afterwards.

use crate::error::{DbError, DbResult};
use std::collections::HashMap;

/// Identity of a logical database operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Insert,
    GetById,
    GetByField,
    GetByFieldName,
    GetIdByFields,
    GetAll,
    GetAllGroupsParticipants,
    Update,
    UpdateByField,
    IsDisabled,
    DeleteById,
    DeleteByField,
}

impl QueryKey {
    pub const ALL: [QueryKey; 12] = [
        QueryKey::Insert,
        QueryKey::GetById,
        QueryKey::GetByField,
        QueryKey::GetByFieldName,
        QueryKey::GetIdByFields,
        QueryKey::GetAll,
        QueryKey::GetAllGroupsParticipants,
        QueryKey::Update,
        QueryKey::UpdateByField,
        QueryKey::IsDisabled,
        QueryKey::DeleteById,
        QueryKey::DeleteByField,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::GetById => "GET_BY_ID",
            Self::GetByField => "GET_BY_FIELD",
            Self::GetByFieldName => "GET_BY_FIELD_NAME",
            Self::GetIdByFields => "GET_ID_BY_FIELDS",
            Self::GetAll => "GET_ALL",
            Self::GetAllGroupsParticipants => "GET_ALL_GROUPS_PARTICIPANTS",
            Self::Update => "UPDATE",
            Self::UpdateByField => "UPDATE_BY_FIELD",
            Self::IsDisabled => "ISDISABLED",
            Self::DeleteById => "DELETE_BY_ID",
            Self::DeleteByField => "DELETE_BY_FIELD",
        }
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only mapping from [`QueryKey`] to statement text.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    queries: HashMap<QueryKey, String>,
}

impl QueryRegistry {
    /// Build the registry from an entity's statement table.
    ///
    /// A key listed twice keeps its last statement.
    pub fn register(table: &[(QueryKey, &str)]) -> Self {
        Self {
            queries: table
                .iter()
                .map(|(key, sql)| (*key, (*sql).to_string()))
                .collect(),
        }
    }

    /// Statement text for `key`.
    ///
    /// An absent key, or one registered with blank text, is a
    /// [`DbError::QueryNotFound`]; nothing is ever defaulted.
    pub fn resolve(&self, key: QueryKey) -> DbResult<&str> {
        self.queries
            .get(&key)
            .map(String::as_str)
            .filter(|sql| !sql.trim().is_empty())
            .ok_or_else(|| DbError::query_not_found(key))
    }

    pub fn contains(&self, key: QueryKey) -> bool {
        self.resolve(key).is_ok()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
