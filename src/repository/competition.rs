//! Competition records.

use crate::db::{ConnectionManager, QueryKey};
use crate::error::DbResult;
use crate::models::{RawFields, SqlValue};
use crate::repository::{Entity, Repository};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

static REPOSITORY: OnceLock<Repository<Competition>> = OnceLock::new();

const QUERIES: &[(QueryKey, &str)] = &[
    (
        QueryKey::Insert,
        "INSERT INTO competitions (id_competition, name, description, start, finish, id_criteria) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    ),
    (
        QueryKey::GetById,
        "SELECT id_competition, name, description, start, finish, id_criteria \
         FROM competitions WHERE id_competition = $1",
    ),
    (
        QueryKey::GetByField,
        "SELECT id_competition, name, description, start, finish, id_criteria \
         FROM competitions WHERE {field} = $1",
    ),
    (
        QueryKey::GetAll,
        "SELECT id_competition, name, description, start, finish, id_criteria FROM competitions",
    ),
    (
        QueryKey::Update,
        "UPDATE competitions SET name = $1, description = $2, start = $3, finish = $4, \
         id_criteria = $5 WHERE id_competition = $6",
    ),
    (
        QueryKey::UpdateByField,
        "UPDATE competitions SET {field} = $1 WHERE {id_field} = $2",
    ),
];

/// A competition between users, scored by one criteria set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    pub id_competition: String,
    pub name: String,
    pub description: String,
    pub start: NaiveDate,
    pub finish: NaiveDate,
    pub id_criteria: String,
}

impl Entity for Competition {
    const ID_FIELD: &'static str = "id_competition";
    const FIELDS: &'static [&'static str] = &[
        "id_competition",
        "name",
        "description",
        "start",
        "finish",
        "id_criteria",
    ];
    // Competitions are kept for history
    const DELETABLE: bool = false;

    fn queries() -> &'static [(QueryKey, &'static str)] {
        QUERIES
    }

    fn id(&self) -> &str {
        &self.id_competition
    }

    fn to_fields(&self) -> RawFields {
        RawFields::with_capacity(Self::FIELDS.len())
            .with("id_competition", self.id_competition.as_str())
            .with("name", self.name.as_str())
            .with("description", self.description.as_str())
            .with("start", self.start)
            .with("finish", self.finish)
            .with("id_criteria", self.id_criteria.as_str())
    }

    fn create_instance(mut raw: RawFields) -> DbResult<Self> {
        Ok(Self {
            id_competition: raw.id_or_generate("id_competition"),
            name: raw.text_or_default("name"),
            description: raw.text_or_default("description"),
            start: raw.date_or_today("start")?,
            finish: raw.date_or_today("finish")?,
            id_criteria: raw.id_or_generate("id_criteria"),
        })
    }
}

/// Requested changes to a competition. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompetitionEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start: Option<NaiveDate>,
    pub finish: Option<NaiveDate>,
    pub id_criteria: Option<String>,
}

impl Repository<Competition> {
    /// Apply `edit` to the stored competition and, on success, to `competition`.
    ///
    /// Only fields whose requested value differs from the current one are
    /// written, all inside one transaction. Returns `true` when every
    /// written field matched the stored row, including when nothing needed
    /// to change.
    pub fn edit_competition(
        &self,
        competition: &mut Competition,
        edit: CompetitionEdit,
    ) -> DbResult<bool> {
        let mut changes: Vec<(&str, SqlValue)> = Vec::new();
        if let Some(name) = edit.name.as_ref().filter(|v| **v != competition.name) {
            changes.push(("name", SqlValue::from(name.as_str())));
        }
        if let Some(description) = edit
            .description
            .as_ref()
            .filter(|v| **v != competition.description)
        {
            changes.push(("description", SqlValue::from(description.as_str())));
        }
        if let Some(start) = edit.start.filter(|v| *v != competition.start) {
            changes.push(("start", SqlValue::from(start)));
        }
        if let Some(finish) = edit.finish.filter(|v| *v != competition.finish) {
            changes.push(("finish", SqlValue::from(finish)));
        }
        if let Some(id_criteria) = edit
            .id_criteria
            .as_ref()
            .filter(|v| **v != competition.id_criteria)
        {
            changes.push(("id_criteria", SqlValue::from(id_criteria.as_str())));
        }

        if changes.is_empty() {
            debug!(id = %competition.id_competition, "Competition already up to date");
            return Ok(true);
        }

        let id = competition.id_competition.clone();
        let all_applied = self.manager().transaction(|conn| {
            let mut all_applied = true;
            for (field, value) in changes {
                let outcome = self.update_by_field_in(
                    conn,
                    &id,
                    Competition::ID_FIELD,
                    field,
                    Some(value),
                )?;
                all_applied &= outcome.is_applied();
            }
            Ok(all_applied)
        })?;

        if all_applied {
            let CompetitionEdit {
                name,
                description,
                start,
                finish,
                id_criteria,
            } = edit;
            if let Some(name) = name {
                competition.name = name;
            }
            if let Some(description) = description {
                competition.description = description;
            }
            if let Some(start) = start {
                competition.start = start;
            }
            if let Some(finish) = finish {
                competition.finish = finish;
            }
            if let Some(id_criteria) = id_criteria {
                competition.id_criteria = id_criteria;
            }
        }
        Ok(all_applied)
    }
}

/// The process-wide competition repository over [`ConnectionManager::global`].
pub fn competition_repository() -> DbResult<&'static Repository<Competition>> {
    if let Some(repository) = REPOSITORY.get() {
        return Ok(repository);
    }
    let manager = ConnectionManager::global()?;
    Ok(REPOSITORY.get_or_init(|| Repository::new(manager.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::QueryRegistry;
    use chrono::Local;

    #[test]
    fn test_create_instance_fills_defaults() {
        let before = Local::now().date_naive();
        let competition = Competition::create_instance(RawFields::new()).unwrap();
        let after = Local::now().date_naive();

        assert!(!competition.id_competition.is_empty());
        assert!(!competition.id_criteria.is_empty());
        assert_ne!(competition.id_competition, competition.id_criteria);
        assert_eq!(competition.name, "");
        assert_eq!(competition.description, "");
        assert!(competition.start >= before && competition.start <= after);
        assert_eq!(competition.start, competition.finish);
    }

    #[test]
    fn test_create_instance_reads_stored_values() {
        let raw = RawFields::new()
            .with("ID_COMPETITION", "c-1")
            .with("name", "Spring run")
            .with("description", SqlValue::Null)
            .with("start", "2024-03-01")
            .with("finish", NaiveDate::from_ymd_opt(2024, 3, 31).unwrap())
            .with("id_criteria", "k-1");

        let competition = Competition::create_instance(raw).unwrap();
        assert_eq!(competition.id_competition, "c-1");
        assert_eq!(competition.name, "Spring run");
        assert_eq!(competition.description, "");
        assert_eq!(competition.start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(competition.finish, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
    }

    #[test]
    fn test_create_instance_rejects_bad_date() {
        let raw = RawFields::new().with("start", "first of march");
        assert!(Competition::create_instance(raw).is_err());
    }

    #[test]
    fn test_to_fields_follows_canonical_order() {
        let competition = Competition {
            id_competition: "c-1".into(),
            name: "Spring run".into(),
            description: "5k".into(),
            start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            finish: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            id_criteria: "k-1".into(),
        };

        let values = competition.to_fields().ordered(Competition::FIELDS).unwrap();
        assert_eq!(values[0], SqlValue::from("c-1"));
        assert_eq!(values[3], SqlValue::Date(competition.start));
        assert_eq!(values[5], SqlValue::from("k-1"));
    }

    #[test]
    fn test_statement_table_has_no_deletes() {
        let registry = QueryRegistry::register(Competition::queries());
        assert!(registry.contains(QueryKey::Insert));
        assert!(registry.contains(QueryKey::UpdateByField));
        assert!(!registry.contains(QueryKey::DeleteById));
        assert!(!registry.contains(QueryKey::DeleteByField));
    }
}
