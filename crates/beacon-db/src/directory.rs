use anyhow::Result;
use uuid::Uuid;

use crate::{Database, uuid_col};

/// Bulk id -> label lookups used by notification link enrichment. One query
/// per entity type per batch; ids with no row are simply absent from the
/// result.
impl Database {
    pub fn report_labels(&self, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        self.labels("reports", "name", None, ids)
    }

    /// Schools come back ordered by name so school links land on a
    /// notification in a stable, display-friendly order.
    pub fn school_labels(&self, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        self.labels("schools", "name", Some("name"), ids)
    }

    pub fn comment_labels(&self, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        self.labels("comments", "content", None, ids)
    }

    pub fn complaint_labels(&self, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        self.labels("complaints", "title", None, ids)
    }

    pub fn application_labels(&self, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        self.labels("applications", "title", None, ids)
    }

    pub fn user_labels(&self, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        self.labels("users", "first_name || ' ' || last_name", None, ids)
    }

    fn labels(
        &self,
        table: &str,
        label_expr: &str,
        order_by: Option<&str>,
        ids: &[Uuid],
    ) -> Result<Vec<(Uuid, String)>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let order = order_by.map(|c| format!(" ORDER BY {c}")).unwrap_or_default();
            let sql = format!(
                "SELECT id, {label_expr} FROM {table} WHERE id IN ({}){order}",
                placeholders.join(", ")
            );

            let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            let params: Vec<&dyn rusqlite::types::ToSql> = id_strings
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((uuid_col(row, 0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Seed surface for the owning CRUD layer (and tests) --

    pub fn insert_report(&self, id: Uuid, name: &str) -> Result<()> {
        self.insert_entity("reports", "name", id, name)
    }

    pub fn insert_school(&self, id: Uuid, name: &str) -> Result<()> {
        self.insert_entity("schools", "name", id, name)
    }

    pub fn insert_comment(&self, id: Uuid, content: &str) -> Result<()> {
        self.insert_entity("comments", "content", id, content)
    }

    pub fn insert_complaint(&self, id: Uuid, title: &str) -> Result<()> {
        self.insert_entity("complaints", "title", id, title)
    }

    pub fn insert_application(&self, id: Uuid, title: &str) -> Result<()> {
        self.insert_entity("applications", "title", id, title)
    }

    fn insert_entity(&self, table: &str, column: &str, id: Uuid, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT OR REPLACE INTO {table} (id, {column}) VALUES (?1, ?2)"),
                (id.to_string(), value),
            )?;
            Ok(())
        })
    }
}
