//! The pager: owns the on-disk file, the header, and transaction lifecycle
//! (spec §3 "Pager", §4.5 "Transaction"), ported from the teacher's
//! `logical/pager.rs` / `physical/transaction.rs`.

pub mod header;
pub mod transaction;

use std::collections::HashMap;
use std::path::Path;

use crate::config::OpenOptions;
use crate::error::{Error, Result};
use crate::hnsw::HnswIndex;
use crate::page::{CachedPageSource, FilePageSource, PageSource, ProxyPageSource};
use header::Header;
use transaction::Transaction;

/// An open database file. Reads and writes go through a swappable
/// `ProxyPageSource` so a transaction can interpose a shadow without the
/// `Database` itself changing identity (spec §9 "Transactional
/// interposition").
///
/// `indexes` holds the HNSW indexes attached to vector columns of this
/// database, keyed by the name a transaction's recorded vector mutations
/// reference; `Transaction::commit` replays those mutations against them
/// (spec §4.6 "Auto-maintenance").
#[derive(Debug)]
pub struct Database {
    proxy: ProxyPageSource,
    header: Header,
    indexes: HashMap<String, HnswIndex>,
}

impl Database {
    /// Opens an existing database file, or creates one if `options` allows
    /// it and the file does not exist.
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_str().ok_or_else(|| Error::Other("non UTF-8 path".into()))?;
        if !path.exists() {
            if !options.create {
                return Err(Error::FileNotFound(path_str.to_string()));
            }
            return Self::create(path_str, options);
        }

        let file_source = FilePageSource::open(path_str, options.page_size, options.writable)?;
        let header = Header::read_from_page(&file_source.get_page(1)?)?;
        let boxed: Box<dyn PageSource> = if options.cache_pages > 0 {
            Box::new(CachedPageSource::new(file_source, options.cache_pages))
        } else {
            Box::new(file_source)
        };
        Ok(Self {
            proxy: ProxyPageSource::new(boxed),
            header,
            indexes: HashMap::new(),
        })
    }

    fn create(path: &str, options: &OpenOptions) -> Result<Self> {
        let header = Header::with_page_size(options.page_size);
        let mut page1 = vec![0u8; options.page_size as usize];
        header.write_to_page(&mut page1);

        let mut file_source = FilePageSource::create(path, options.page_size)?;
        file_source.write_page(1, &page1)?;

        Ok(Self {
            proxy: ProxyPageSource::new(Box::new(file_source)),
            header,
            indexes: HashMap::new(),
        })
    }

    pub fn page_size(&self) -> u32 {
        self.header.page_size()
    }

    pub fn schema_cookie(&self) -> u32 {
        self.header.schema_cookie()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn page_source(&self) -> &dyn PageSource {
        &self.proxy
    }

    /// Begins a transaction: a shadow overlay is spliced in front of the
    /// database's page source so writes are isolated until `commit`.
    pub fn begin_transaction(&mut self) -> Transaction<'_> {
        Transaction::new(self)
    }

    pub(crate) fn proxy_mut(&mut self) -> &mut ProxyPageSource {
        &mut self.proxy
    }

    pub(crate) fn set_header(&mut self, header: Header) {
        self.header = header;
    }

    /// Attaches an HNSW index under `name` so that future transactions can
    /// record vector mutations against it for commit-time auto-maintenance.
    pub fn attach_index(&mut self, name: impl Into<String>, index: HnswIndex) {
        self.indexes.insert(name.into(), index);
    }

    pub fn detach_index(&mut self, name: &str) -> Option<HnswIndex> {
        self.indexes.remove(name)
    }

    pub fn index(&self, name: &str) -> Option<&HnswIndex> {
        self.indexes.get(name)
    }

    pub fn index_mut(&mut self, name: &str) -> Option<&mut HnswIndex> {
        self.indexes.get_mut(name)
    }

    pub(crate) fn indexes_mut(&mut self) -> &mut HashMap<String, HnswIndex> {
        &mut self.indexes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn create_then_reopen_round_trips_header() {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();

        let options = OpenOptions::create_new();
        let db = Database::open(file.path(), &options).unwrap();
        assert_eq!(db.page_size(), options.page_size);
        drop(db);

        let reopened = Database::open(file.path(), &OpenOptions::read_write()).unwrap();
        assert_eq!(reopened.page_size(), options.page_size);
    }

    #[test]
    fn open_missing_without_create_errors() {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();
        let err = Database::open(file.path(), &OpenOptions::read_write()).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }
}
