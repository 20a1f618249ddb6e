use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use super::{PageRef, PageSource};
use crate::error::{Error, Result};

/// Opens the file and reads a single page into an internal buffer per call;
/// subsequent calls to `get_page` overwrite the same buffer. Callers that
/// need multiple page slices simultaneously must upgrade to cached or mmap
/// (spec §4.1).
#[derive(Debug)]
pub struct FilePageSource {
    file: RefCell<File>,
    page_size: u32,
    page_count: u32,
    writable: bool,
    data_version: u64,
    scratch: RefCell<Vec<u8>>,
}

impl FilePageSource {
    pub fn open(path: &str, page_size: u32, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::FileNotFound(path.to_string())
                } else {
                    Error::ReadError(e)
                }
            })?;

        let len = file.metadata()?.len();
        if len == 0 {
            return Err(Error::EmptyFile);
        }
        let page_count = (len / page_size as u64) as u32;

        Ok(Self {
            file: RefCell::new(file),
            page_size,
            page_count,
            writable,
            data_version: 0,
            scratch: RefCell::new(vec![0; page_size as usize]),
        })
    }

    /// Creates a brand new, empty file (no pages yet — `page_count` starts
    /// at 0 and grows as pages are written).
    pub fn create(path: &str, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(Error::ReadError)?;
        Ok(Self {
            file: RefCell::new(file),
            page_size,
            page_count: 0,
            writable: true,
            data_version: 0,
            scratch: RefCell::new(vec![0; page_size as usize]),
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl PageSource for FilePageSource {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>> {
        self.check_bounds(page_number)?;
        let mut file = self.file.borrow_mut();
        let mut scratch = self.scratch.borrow_mut();
        file.seek(SeekFrom::Start(
            (page_number as u64 - 1) * self.page_size as u64,
        ))?;
        file.read_exact(&mut scratch)?;
        Ok(PageRef::Owned(scratch.clone().into_boxed_slice()))
    }

    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::Other("file source is read-only".into()));
        }
        if bytes.len() != self.page_size as usize {
            return Err(Error::ShortWrite {
                expected: self.page_size as usize,
                actual: bytes.len(),
            });
        }
        if page_number == 0 {
            return Err(Error::PageOutOfRange {
                page: 0,
                page_count: self.page_count,
            });
        }
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(
            (page_number as u64 - 1) * self.page_size as u64,
        ))?;
        file.write_all(bytes)?;
        if page_number > self.page_count {
            self.page_count = page_number;
        }
        self.data_version += 1;
        Ok(())
    }
}
