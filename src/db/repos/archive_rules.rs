use async_trait::async_trait;

use crate::{
    db::{
        error::DbResult,
        filter::{Dialect, SqlFilter, TableSchema},
    },
    models::{ArchiveHeader, ArchiveTerm, BoundaryWrite},
};

/// Access to the archive rule tables.
///
/// Reads of the header table happen outside any transaction. Everything that
/// writes goes through [`ArchiveRuleTx`] so a phase commits as one unit.
#[async_trait]
pub trait ArchiveRuleRepo: Send + Sync {
    /// Headers with `autoArchive` enabled, ordered by id.
    async fn list_auto_archive_headers(&self) -> DbResult<Vec<ArchiveHeader>>;

    /// Open a transaction over the rule tables and the archived tables.
    async fn begin(&self) -> DbResult<Box<dyn ArchiveRuleTx>>;

    /// Placeholder style used by [`ArchiveRuleTx`] queries.
    fn dialect(&self) -> Dialect;
}

/// One open transaction.
///
/// Dropping it without calling [`commit`](ArchiveRuleTx::commit) rolls back.
#[async_trait]
pub trait ArchiveRuleTx: Send {
    /// Non-boundary terms of a header, in insertion order.
    async fn static_terms(&mut self, header_id: i64) -> DbResult<Vec<ArchiveTerm>>;

    /// Current value of the header's `id <` term, if one exists.
    async fn boundary(&mut self, header_id: i64) -> DbResult<Option<i64>>;

    /// Update the boundary term in place, or insert it when missing.
    async fn upsert_boundary(
        &mut self,
        header_id: i64,
        value: i64,
        actor: &str,
    ) -> DbResult<BoundaryWrite>;

    /// Column allow-list of an archived table, read from the catalog.
    async fn describe_table(&mut self, table: &str) -> DbResult<TableSchema>;

    /// `MIN(id)` over the rows matching `filter`.
    async fn min_id(&mut self, schema: &TableSchema, filter: &SqlFilter) -> DbResult<Option<i64>>;

    /// Number of rows matching `filter`.
    async fn count_rows(&mut self, schema: &TableSchema, filter: &SqlFilter) -> DbResult<i64>;

    /// Lowest non-null id matching `filter`, found by an ordered scan.
    async fn first_id(&mut self, schema: &TableSchema, filter: &SqlFilter) -> DbResult<Option<i64>>;

    async fn savepoint(&mut self, name: &str) -> DbResult<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> DbResult<()>;

    async fn release_savepoint(&mut self, name: &str) -> DbResult<()>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}
