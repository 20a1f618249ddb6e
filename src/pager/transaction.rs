//! Transaction lifecycle (spec §4.5 "Transaction"), ported from the
//! teacher's `physical/transaction.rs`.
//!
//! `begin_transaction` pulls the database's current page source out of its
//! proxy, wraps it in an owning `ShadowPageSource`, and hands the shadow to
//! the `Transaction`. `commit` flushes the shadow into the base in place and
//! returns the base to the proxy; `rollback` discards the shadow's dirty
//! pages and returns the unmodified base. Either way the database is left
//! with exactly the page source it started with (spec §9 "Transactional
//! interposition").

use std::collections::HashSet;

use crate::error::Result;
use crate::page::{PageSource, ShadowPageSource};
use crate::pager::header::Header;
use crate::pager::Database;

/// A single vector-column mutation recorded during a transaction, replayed
/// against its attached HNSW index at commit (spec §4.6 "Auto-maintenance").
#[derive(Debug, Clone)]
enum VectorOp {
    Upsert(Vec<f32>),
    Delete,
}

/// A placeholder page source that temporarily occupies the database's proxy
/// slot while its real target is on loan to an open `Transaction`.
#[derive(Debug)]
struct EmptyPageSource;

impl PageSource for EmptyPageSource {
    fn page_size(&self) -> u32 {
        0
    }

    fn page_count(&self) -> u32 {
        0
    }

    fn data_version(&self) -> u64 {
        0
    }

    fn get_page(&self, page_number: u32) -> Result<crate::page::PageRef<'_>> {
        Err(crate::error::Error::PageOutOfRange { page: page_number, page_count: 0 })
    }

    fn write_page(&mut self, _page_number: u32, _bytes: &[u8]) -> Result<()> {
        Err(crate::error::Error::Closed)
    }
}

pub struct Transaction<'db> {
    database: &'db mut Database,
    shadow: Option<ShadowPageSource<Box<dyn PageSource>>>,
    header: Header,
    pending_vector_ops: Vec<(String, i64, VectorOp)>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(database: &'db mut Database) -> Self {
        let base = database.proxy_mut().swap(Box::new(EmptyPageSource));
        let header = database.header().clone();
        tracing::debug!(schema_cookie = header.schema_cookie(), "transaction begin");
        Self {
            database,
            shadow: Some(ShadowPageSource::new(base)),
            header,
            pending_vector_ops: Vec::new(),
        }
    }

    fn shadow(&self) -> &ShadowPageSource<Box<dyn PageSource>> {
        self.shadow.as_ref().expect("transaction already finished")
    }

    fn shadow_mut(&mut self) -> &mut ShadowPageSource<Box<dyn PageSource>> {
        self.shadow.as_mut().expect("transaction already finished")
    }

    /// The page source to read and write through for the duration of the
    /// transaction.
    pub fn page_source(&self) -> &dyn PageSource {
        self.shadow()
    }

    pub fn page_source_mut(&mut self) -> &mut dyn PageSource {
        self.shadow_mut()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Records a vector upsert against the index attached under
    /// `index_name`, to be replayed at commit. Rolling back the transaction
    /// discards it instead.
    pub fn record_vector_upsert(&mut self, index_name: impl Into<String>, row_id: i64, vector: Vec<f32>) {
        self.pending_vector_ops.push((index_name.into(), row_id, VectorOp::Upsert(vector)));
    }

    pub fn record_vector_delete(&mut self, index_name: impl Into<String>, row_id: i64) {
        self.pending_vector_ops.push((index_name.into(), row_id, VectorOp::Delete));
    }

    fn restore_base(&mut self, base: Box<dyn PageSource>) {
        let old = self.database.proxy_mut().swap(base);
        drop(old); // the EmptyPageSource placeholder
    }

    /// Flushes dirty pages into the base source, updates the header, then
    /// replays recorded vector mutations against attached HNSW indexes
    /// before returning (spec §5 "HNSW auto-maintenance is performed
    /// synchronously as the final step of commit").
    pub fn commit(mut self) -> Result<()> {
        let mut shadow = self.shadow.take().expect("transaction already finished");
        if shadow.has_dirty_pages() {
            self.header.set_database_size(shadow.page_count());
            let mut page1 = shadow.get_page(1)?.to_vec();
            self.header.write_to_page(&mut page1);
            shadow.write_page(1, &page1)?;
        }
        let dirty_pages = shadow.dirty_page_numbers().count();
        shadow.flush_to_base()?;
        self.database.set_header(self.header.clone());
        self.restore_base(shadow.into_base());

        let vector_ops = std::mem::take(&mut self.pending_vector_ops);
        let mut touched_indexes = HashSet::new();
        for (index_name, row_id, op) in vector_ops {
            if let Some(index) = self.database.indexes_mut().get_mut(&index_name) {
                match op {
                    VectorOp::Upsert(vector) => index.upsert(row_id, vector)?,
                    VectorOp::Delete => index.delete(row_id),
                }
                touched_indexes.insert(index_name);
            }
        }
        for index_name in &touched_indexes {
            if let Some(index) = self.database.indexes_mut().get_mut(index_name) {
                index.merge_pending_mutations();
            }
        }

        tracing::debug!(
            dirty_pages,
            database_size = self.header.database_size(),
            indexes_maintained = touched_indexes.len(),
            "transaction commit"
        );
        Ok(())
    }

    /// Discards every page written during the transaction.
    pub fn rollback(mut self) -> Result<()> {
        let shadow = self.shadow.take().expect("transaction already finished");
        let dirty_pages = shadow.dirty_page_numbers().count();
        self.restore_base(shadow.into_base());
        tracing::debug!(dirty_pages, "transaction rollback");
        Ok(())
    }
}

impl<'db> Drop for Transaction<'db> {
    fn drop(&mut self) {
        if let Some(shadow) = self.shadow.take() {
            let old = self.database.proxy_mut().swap(shadow.into_base());
            drop(old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenOptions;
    use crate::hnsw::{DistanceMetric, HnswConfig, HnswIndex};
    use tempfile::NamedTempFile;

    #[test]
    fn commit_persists_writes_and_unblocks_the_database() {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();
        let mut db = Database::open(file.path(), &OpenOptions::create_new()).unwrap();

        {
            let mut txn = db.begin_transaction();
            let page_size = txn.header().page_size() as usize;
            txn.page_source_mut().write_page(1, &vec![7u8; page_size]).unwrap();
            txn.commit().unwrap();
        }

        // Commit re-stamps the 100-byte file header onto page 1, so only the
        // content past it is expected to survive as written.
        let page_size = db.page_size() as usize;
        let page = db.page_source().get_page(1).unwrap().to_vec();
        assert_eq!(&page[crate::pager::header::HEADER_SIZE..], &vec![7u8; page_size - crate::pager::header::HEADER_SIZE][..]);
    }

    #[test]
    fn rollback_discards_writes() {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();
        let mut db = Database::open(file.path(), &OpenOptions::create_new()).unwrap();
        let original = db.page_source().get_page(1).unwrap().to_vec();

        {
            let mut txn = db.begin_transaction();
            let page_size = txn.header().page_size() as usize;
            txn.page_source_mut().write_page(1, &vec![7u8; page_size]).unwrap();
            txn.rollback().unwrap();
        }

        assert_eq!(db.page_source().get_page(1).unwrap().to_vec(), original);
    }

    #[test]
    fn commit_replays_vector_mutations_into_attached_index() {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();
        let mut db = Database::open(file.path(), &OpenOptions::create_new()).unwrap();
        db.attach_index(
            "notes.embedding",
            HnswIndex::build(DistanceMetric::Euclidean, 2, HnswConfig::default(), &[(1, vec![0.0, 0.0])]),
        );

        {
            let mut txn = db.begin_transaction();
            txn.record_vector_upsert("notes.embedding", 2, vec![1.0, 0.0]);
            txn.commit().unwrap();
        }

        let index = db.index("notes.embedding").unwrap();
        assert!(!index.has_pending_mutations());
        let hits = index.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].row_id, 2);
    }

    #[test]
    fn rollback_does_not_reach_attached_index() {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();
        let mut db = Database::open(file.path(), &OpenOptions::create_new()).unwrap();
        db.attach_index(
            "notes.embedding",
            HnswIndex::build(DistanceMetric::Euclidean, 2, HnswConfig::default(), &[(1, vec![0.0, 0.0])]),
        );

        {
            let mut txn = db.begin_transaction();
            txn.record_vector_upsert("notes.embedding", 2, vec![1.0, 0.0]);
            txn.rollback().unwrap();
        }

        let index = db.index("notes.embedding").unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert!(hits.iter().all(|m| m.row_id != 2));
    }

    #[test]
    fn dropping_an_unfinished_transaction_rolls_back() {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();
        let mut db = Database::open(file.path(), &OpenOptions::create_new()).unwrap();
        let original = db.page_source().get_page(1).unwrap().to_vec();

        {
            let mut txn = db.begin_transaction();
            let page_size = txn.header().page_size() as usize;
            txn.page_source_mut().write_page(1, &vec![7u8; page_size]).unwrap();
        }

        assert_eq!(db.page_source().get_page(1).unwrap().to_vec(), original);
    }
}
