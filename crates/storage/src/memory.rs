//! In-memory reference backend
//!
//! Records live in one ordered table per [`RecordType`]. Tables are shared
//! copy-on-write: a transaction starts from the committed tables and a
//! read-write transaction gets a private copy on its first write.
//!
//! Commit is optimistic. A transaction that wrote something installs its copy
//! only if no other commit happened since it began, otherwise it fails with an
//! I/O error and leaves the committed tables untouched.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use kstore_core::{
    Condition, Error, MatchConditions, MatchIds, MatchProperties, Record, RecordStream,
    RecordType, Result, Store, Transaction, TypeMap, Uri,
};
use parking_lot::Mutex;
use tracing::debug;

type Table = BTreeMap<Uri, Arc<Record>>;
type Tables = TypeMap<Table>;

#[derive(Debug, Default)]
struct MemoryState {
    tables: Arc<Tables>,
    revision: u64,
    closed: bool,
}

/// Volatile [`Store`] keeping every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed commits that changed data
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Number of committed records of type `ty`
    pub fn len(&self, ty: RecordType) -> usize {
        self.state.lock().tables[ty].len()
    }

    /// Whether no committed record exists of any type
    pub fn is_empty(&self) -> bool {
        self.state.lock().tables.iter().all(|(_, table)| table.is_empty())
    }
}

impl Store for MemoryStore {
    fn init(&self) -> Result<()> {
        debug!("memory store initialized");
        Ok(())
    }

    fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>> {
        let state = self.state.lock();
        if state.closed {
            return Err(Error::illegal_state("memory store closed"));
        }
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            read_only,
            base_revision: state.revision,
            tables: Arc::clone(&state.tables),
            modified: false,
            ended: false,
        }))
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }
}

/// Transaction over a [`MemoryStore`] snapshot.
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    read_only: bool,
    base_revision: u64,
    tables: Arc<Tables>,
    modified: bool,
    ended: bool,
}

impl MemoryTransaction {
    fn check_active(&self) -> Result<()> {
        if self.ended {
            return Err(Error::illegal_state("transaction already ended"));
        }
        Ok(())
    }

    fn table_mut(&mut self, ty: RecordType) -> Result<&mut Table> {
        self.check_active()?;
        if self.read_only {
            return Err(Error::illegal_state("transaction is read-only"));
        }
        self.modified = true;
        Ok(&mut Arc::make_mut(&mut self.tables)[ty])
    }

    fn matching<'a>(
        &'a self,
        ty: RecordType,
        condition: Option<&'a Condition>,
    ) -> impl Iterator<Item = &'a Arc<Record>> + 'a {
        self.tables[ty]
            .values()
            .filter(move |record| condition.map_or(true, |c| c.matches(record)))
    }
}

fn project(record: &Record, properties: Option<&[Uri]>) -> Record {
    match properties {
        Some(properties) => record.projected(properties),
        None => record.clone(),
    }
}

impl Transaction for MemoryTransaction {
    fn lookup(
        &mut self,
        ty: RecordType,
        ids: &[Uri],
        properties: Option<&[Uri]>,
    ) -> Result<RecordStream> {
        self.check_active()?;
        let table = &self.tables[ty];
        let records = ids
            .iter()
            .filter_map(|id| table.get(id))
            .map(|record| project(record, properties))
            .collect();
        Ok(RecordStream::from_vec(records))
    }

    fn retrieve(
        &mut self,
        ty: RecordType,
        condition: Option<&Condition>,
        properties: Option<&[Uri]>,
    ) -> Result<RecordStream> {
        self.check_active()?;
        let records = self
            .matching(ty, condition)
            .map(|record| project(record, properties))
            .collect();
        Ok(RecordStream::from_vec(records))
    }

    fn count(&mut self, ty: RecordType, condition: Option<&Condition>) -> Result<u64> {
        self.check_active()?;
        Ok(self.matching(ty, condition).count() as u64)
    }

    fn match_records(
        &mut self,
        _conditions: &MatchConditions,
        _ids: &MatchIds,
        _properties: &MatchProperties,
    ) -> Result<RecordStream> {
        self.check_active()?;
        Err(Error::Unsupported("match is not supported by the memory store".into()))
    }

    fn store(&mut self, ty: RecordType, record: Record) -> Result<()> {
        let table = self.table_mut(ty)?;
        table.insert(record.id().clone(), Arc::new(record));
        Ok(())
    }

    fn delete(&mut self, ty: RecordType, id: &Uri) -> Result<()> {
        self.table_mut(ty)?.remove(id);
        Ok(())
    }

    fn end(&mut self, commit: bool) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        if !commit || !self.modified {
            return Ok(());
        }

        let mut state = self.state.lock();
        if state.revision != self.base_revision {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "concurrent modification",
            )));
        }
        state.tables = Arc::clone(&self.tables);
        state.revision += 1;
        debug!(revision = state.revision, "memory store commit");
        Ok(())
    }
}
