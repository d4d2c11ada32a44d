//! The storage context: one SQLite database plus the data directories next
//! to it, opened or created explicitly and passed to every operation.

use std::cell::{Cell, RefCell, RefMut};
use std::io::Write;
use std::path::{Path, PathBuf};

// used for persistence
use rusqlite::Connection;
use tracing::{debug, info};

use crate::attributes::Attributes;
use crate::error::{Result, TensorlabError};
use crate::files;
use crate::groups::Groups;
use crate::models::Models;
use crate::persist::Persistor;
use crate::project::UserProject;
use crate::runs::Runs;

pub struct Storage {
    root: PathBuf,
    connection: Connection,
    project: Box<dyn UserProject>,
    log_stream: RefCell<Box<dyn Write>>,
    root_group_id: i64,
    generation: Cell<u64>,
}

impl Storage {
    /// Creates a new storage under `root`.
    pub fn create(
        root: impl Into<PathBuf>,
        project: Box<dyn UserProject>,
        log_stream: Box<dyn Write>,
    ) -> Result<Storage> {
        let root = root.into();
        if files::is_storage_exist(&root) {
            return Err(TensorlabError::storage_instantiation(format!(
                "Storage already created at {}",
                root.display()
            )));
        }
        files::create_storage_directory(&root).map_err(|e| {
            TensorlabError::storage_instantiation(format!("Cannot create storage at {}: {}", root.display(), e))
        })?;
        let storage = Self::connect(root, project, log_stream)?;
        info!(root = %storage.root.display(), "storage created");
        Ok(storage)
    }

    /// Opens the storage previously created under `root`.
    pub fn open(
        root: impl Into<PathBuf>,
        project: Box<dyn UserProject>,
        log_stream: Box<dyn Write>,
    ) -> Result<Storage> {
        let root = root.into();
        if !files::is_storage_exist(&root) {
            return Err(TensorlabError::storage_instantiation(format!(
                "Storage files not found at {}",
                root.display()
            )));
        }
        let storage = Self::connect(root, project, log_stream)?;
        debug!(root = %storage.root.display(), "storage opened");
        Ok(storage)
    }

    fn connect(root: PathBuf, project: Box<dyn UserProject>, log_stream: Box<dyn Write>) -> Result<Storage> {
        let instantiation = |e: rusqlite::Error| {
            TensorlabError::storage_instantiation(format!("Cannot open database in {}: {}", root.display(), e))
        };
        let connection = Connection::open(files::db_path(&root)).map_err(instantiation)?;
        connection.pragma_update(None, "foreign_keys", true).map_err(instantiation)?;
        let root_group_id = Persistor::new(&connection).initialize()?;
        Ok(Storage {
            root,
            connection,
            project,
            log_stream: RefCell::new(log_stream),
            root_group_id,
            generation: Cell::new(0),
        })
    }

    pub fn close(self) -> Result<()> {
        self.connection.close().map_err(|(_, e)| e.into())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    pub fn groups(&self) -> Groups<'_> {
        Groups::new(self)
    }

    pub fn models(&self) -> Models<'_> {
        Models::new(self)
    }

    pub fn runs(&self) -> Runs<'_> {
        Runs::new(self)
    }

    pub fn attributes(&self) -> Attributes<'_> {
        Attributes::new(self)
    }

    pub(crate) fn root_group_id(&self) -> i64 {
        self.root_group_id
    }

    pub(crate) fn project(&self) -> &dyn UserProject {
        self.project.as_ref()
    }

    pub(crate) fn log_stream(&self) -> RefMut<'_, Box<dyn Write>> {
        self.log_stream.borrow_mut()
    }

    /// Bumped after every committed change; cached attribute values taken
    /// at an older generation are stale.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Runs `work` in one transaction. Nothing is kept unless `work`
    /// succeeds and the commit goes through.
    pub(crate) fn write<T>(&self, work: impl FnOnce(&Persistor<'_>) -> Result<T>) -> Result<T> {
        let transaction = self.connection.unchecked_transaction()?;
        let result = work(&Persistor::new(&transaction))?;
        transaction.commit()?;
        self.generation.set(self.generation.get() + 1);
        Ok(result)
    }

    pub(crate) fn read<T>(&self, work: impl FnOnce(&Persistor<'_>) -> Result<T>) -> Result<T> {
        work(&Persistor::new(&self.connection))
    }
}
