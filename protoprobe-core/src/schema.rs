//! # Schema Loading
//!
//! Compiles a root `.proto` file and everything it imports into a [`SchemaRoot`].
//!
//! Imports are resolved by [`IncludePathResolver`]:
//!
//! 1. Absolute import paths are used verbatim.
//! 2. Relative imports are probed against each include directory in order; the first
//!    existing and readable match wins.
//! 3. Otherwise the import is probed relative to the directories of the files loaded so far,
//!    most recent first, which covers imports written relative to the importing file.
//!    `protox` does not tell a [`FileResolver`] which file is importing, so this is an
//!    approximation: when sibling directories hold files of the same name, the import may
//!    resolve next to a different, more recently opened file than its actual importer.
//! 4. Well-known `google/protobuf/*.proto` files fall back to the copies bundled with `protox`.
//!
//! A schema that fails to compile is not fatal for discovery: [`SchemaRoot::load_or_empty`]
//! logs the failure and yields an empty root, which simply lists no services.
use prost_reflect::{DescriptorError, DescriptorPool, MessageDescriptor};
use prost_types::FileDescriptorSet;
use protox::file::{File, FileResolver, GoogleFileResolver};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
    #[error("Failed to compile '{path}': {source}")]
    Compile {
        path: PathBuf,
        #[source]
        source: Box<protox::Error>,
    },
}

/// An in-memory namespace of services, messages and enums, together with the
/// include directories used to build it.
#[derive(Debug, Clone, Default)]
pub struct SchemaRoot {
    pool: DescriptorPool,
    include_dirs: Vec<PathBuf>,
}

impl SchemaRoot {
    /// A root with no files. Every catalog query against it yields zero entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps an already built descriptor pool (e.g. one assembled from reflection).
    pub fn from_pool(pool: DescriptorPool) -> Self {
        Self {
            pool,
            include_dirs: Vec::new(),
        }
    }

    /// Builds a root from a set of file descriptors, in any order.
    pub fn from_file_descriptor_set(fd_set: FileDescriptorSet) -> Result<Self, DescriptorError> {
        DescriptorPool::from_file_descriptor_set(fd_set).map(Self::from_pool)
    }

    /// Compiles `root` and its imports.
    ///
    /// The directory containing `root` is always searched first, followed by `include_dirs`
    /// in the given order. An empty `root` path produces an empty schema.
    pub fn load(root: &Path, include_dirs: &[PathBuf]) -> Result<Self, SchemaLoadError> {
        if root.as_os_str().is_empty() {
            return Ok(Self::empty());
        }

        let mut search_path = Vec::with_capacity(include_dirs.len() + 1);
        search_path.push(match root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        });
        for dir in include_dirs {
            if !search_path.contains(dir) {
                search_path.push(dir.clone());
            }
        }

        let resolver = IncludePathResolver::new(search_path.clone());
        let mut compiler = protox::Compiler::with_file_resolver(resolver);
        compiler.include_imports(true);

        compiler
            .open_file(root)
            .map_err(|source| SchemaLoadError::Compile {
                path: root.to_path_buf(),
                source: Box::new(source),
            })?;

        let pool = compiler.descriptor_pool();

        tracing::debug!(
            root = %root.display(),
            files = pool.files().len(),
            services = pool.services().len(),
            "loaded proto schema"
        );

        Ok(Self {
            pool,
            include_dirs: search_path,
        })
    }

    /// Like [`SchemaRoot::load`], but a failure degrades to an empty root.
    pub fn load_or_empty(root: &Path, include_dirs: &[PathBuf]) -> Self {
        Self::load(root, include_dirs).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "proto schema could not be loaded, continuing with an empty schema");
            Self::empty()
        })
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// The search path the root was compiled with, root directory first.
    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    pub fn is_empty(&self) -> bool {
        self.pool.files().len() == 0
    }

    pub fn get_message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }
}

/// Resolves proto imports against an ordered list of include directories.
pub struct IncludePathResolver {
    include_dirs: Vec<PathBuf>,
    // Directories of the files opened so far, used for importer-relative fallback.
    opened_dirs: Mutex<Vec<PathBuf>>,
    google: GoogleFileResolver,
}

impl IncludePathResolver {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self {
            include_dirs,
            opened_dirs: Mutex::new(Vec::new()),
            google: GoogleFileResolver::new(),
        }
    }

    /// Returns the filesystem path an import name resolves to, without opening it.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let import = Path::new(name);

        if import.is_absolute() {
            return Some(import.to_path_buf());
        }

        if let Some(path) = self
            .include_dirs
            .iter()
            .map(|dir| dir.join(import))
            .find(|path| is_readable(path))
        {
            return Some(path);
        }

        let opened = self
            .opened_dirs
            .lock()
            .map(|dirs| dirs.clone())
            .unwrap_or_default();

        opened
            .iter()
            .rev()
            .map(|dir| dir.join(import))
            .find(|path| is_readable(path))
    }

    fn remember(&self, path: &Path) {
        if let (Some(dir), Ok(mut dirs)) = (path.parent(), self.opened_dirs.lock())
            && !dirs.iter().any(|known| known == dir)
        {
            dirs.push(dir.to_path_buf());
        }
    }
}

impl FileResolver for IncludePathResolver {
    fn resolve_path(&self, path: &Path) -> Option<String> {
        if let Some(name) = self
            .include_dirs
            .iter()
            .find_map(|dir| path.strip_prefix(dir).ok())
            .and_then(import_name)
        {
            return Some(name);
        }

        // Absolute roots outside every include dir are addressed verbatim.
        if path.is_absolute() {
            return path.to_str().map(str::to_owned);
        }

        None
    }

    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        match self.locate(name) {
            Some(path) => {
                tracing::debug!(import = name, path = %path.display(), "resolved proto import");
                let file = File::open(name, &path)?;
                self.remember(&path);
                Ok(file)
            }
            None => self.google.open_file(name),
        }
    }
}

fn is_readable(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}

/// Converts a relative filesystem path into a `/`-separated proto import name.
fn import_name(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();

    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }

    (!parts.is_empty()).then(|| parts.join("/"))
}
