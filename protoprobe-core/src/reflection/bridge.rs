//! # Reflection Bridge
//!
//! Discovers every service of a server through reflection and materializes its schema on disk.
//!
//! A [`ReflectionSession`] owns everything a discovery run produces: a session id, the
//! directory `<base>/protos/<id>/` the schema is written to, and a [`ReflectionCache`] of the
//! file descriptors fetched so far. Nothing is shared between sessions, so concurrent sessions
//! never interfere. A single session must not be used concurrently, which `&mut self` enforces.
//!
//! For each service the session:
//!
//! 1. fetches the file defining it and every file it transitively imports, skipping files
//!    already in the cache,
//! 2. renders each descriptor back to proto source and writes it under the session directory,
//!    mirroring the descriptor's declared path, at most once per session,
//! 3. picks the service's main file: the fetched file no other fetched file depends on,
//! 4. describes its methods, synthesizing an example request body for each.
//!
//! Any failure aborts the whole discovery; there are no partial results.
use super::client::{ReflectionClient, ReflectionResolveError};
use super::proto_source::to_proto_source;
use crate::BoxError;
use crate::catalog::{self, CatalogError, ServiceMethods};
use crate::config::TargetEndpoint;
use crate::invoker::{self, InvokeError};
use crate::mock::MockSynthesizer;
use crate::schema::SchemaRoot;
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorError, DescriptorPool};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use tonic::client::GrpcService;
use tonic::transport::Channel;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Connect(#[from] InvokeError),
    #[error(transparent)]
    Reflection(#[from] ReflectionResolveError),
    #[error("Failed to build descriptors received through reflection: '{0}'")]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Lookup(#[from] CatalogError),
    #[error("Failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid session id '{0}': it must be a single path segment")]
    InvalidSessionId(String),
    #[error("Refusing to write descriptor '{0}' outside the session directory")]
    UnsafeFileName(String),
}

/// File descriptors fetched within one session, keyed by file name. Entries are never replaced.
#[derive(Debug, Clone, Default)]
pub struct ReflectionCache {
    files: HashMap<String, FileDescriptorProto>,
}

impl ReflectionCache {
    pub fn get(&self, name: &str) -> Option<&FileDescriptorProto> {
        self.files.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn names(&self) -> HashSet<String> {
        self.files.keys().cloned().collect()
    }

    fn insert(&mut self, file: FileDescriptorProto) {
        self.files
            .entry(file.name().to_string())
            .or_insert(file);
    }

    /// `roots` and every file they transitively import, roots first.
    fn closure(&self, roots: &[String]) -> Vec<&FileDescriptorProto> {
        let mut seen = HashSet::new();
        let mut pending: Vec<&str> = roots.iter().rev().map(String::as_str).collect();
        let mut files = Vec::new();

        while let Some(name) = pending.pop() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(file) = self.files.get(name) {
                files.push(file);
                pending.extend(file.dependency.iter().rev().map(String::as_str));
            }
        }

        files
    }
}

/// A proto file written by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeFile {
    /// File name without directories.
    pub name: String,
    /// Absolute location on disk.
    pub path: PathBuf,
    /// Rendered proto source.
    pub proto: String,
    /// Location relative to the session base directory.
    pub relative_path: PathBuf,
}

/// Everything needed to reload a discovered schema as a local one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoBundle {
    pub include_dirs: Vec<PathBuf>,
    pub include_files: Vec<IncludeFile>,
    pub proto_path: PathBuf,
    pub proto_content: String,
}

/// The files materialized for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// Declared name of the main file.
    pub main_file: String,
    /// Declared names of every file in the symbol's dependency tree, main file first.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredService {
    #[serde(flatten)]
    pub methods: ServiceMethods,
    pub proto_path: PathBuf,
}

/// The result of a discovery run, keyed by fully-qualified service name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovery {
    #[serde(flatten)]
    pub services: BTreeMap<String, DiscoveredService>,
    pub protos: ProtoBundle,
}

impl Discovery {
    /// Loads the persisted bundle back as a local schema.
    pub fn load_schema(&self) -> Result<SchemaRoot, crate::schema::SchemaLoadError> {
        SchemaRoot::load(&self.protos.proto_path, &self.protos.include_dirs)
    }
}

/// The short name reflection results are reported under: everything after the first `.`.
pub fn reflection_short_name(full_name: &str) -> &str {
    full_name
        .split_once('.')
        .map_or(full_name, |(_, rest)| rest)
}

/// One discovery session against one server.
#[derive(Debug)]
pub struct ReflectionSession<S = Channel> {
    id: String,
    base_dir: PathBuf,
    client: ReflectionClient<S>,
    cache: ReflectionCache,
    bundle: ProtoBundle,
}

impl ReflectionSession<Channel> {
    /// Connects to `target` with its configured credentials.
    pub async fn connect(target: &TargetEndpoint, session_id: &str) -> Result<Self, DiscoveryError> {
        let channel = invoker::connect(target).await?;
        Self::new(channel, session_id)
    }
}

impl<S> ReflectionSession<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Starts a session over `service`. An empty `session_id` gets a fresh random one.
    pub fn new(service: S, session_id: &str) -> Result<Self, DiscoveryError> {
        let id = if session_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            validate_session_id(session_id)?
        };

        Ok(Self {
            id,
            base_dir: std::env::temp_dir(),
            client: ReflectionClient::new(service),
            cache: ReflectionCache::default(),
            bundle: ProtoBundle::default(),
        })
    }

    /// Writes under `base_dir` instead of the system temporary directory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The directory this session writes proto files into.
    pub fn root_dir(&self) -> PathBuf {
        self.base_dir.join("protos").join(&self.id)
    }

    pub fn cache(&self) -> &ReflectionCache {
        &self.cache
    }

    /// Every file written so far.
    pub fn bundle(&self) -> &ProtoBundle {
        &self.bundle
    }

    /// Fetches and persists the dependency tree of `symbol`.
    #[tracing::instrument(skip(self), fields(session = %self.id))]
    pub async fn resolve_symbol(&mut self, symbol: &str) -> Result<ResolvedSymbol, DiscoveryError> {
        let fetched = self
            .client
            .file_descriptors_by_symbol(symbol, &self.cache.names())
            .await?;

        let roots: Vec<String> = fetched.iter().map(|f| f.name().to_string()).collect();
        for file in fetched {
            self.cache.insert(file);
        }

        let closure: Vec<FileDescriptorProto> =
            self.cache.closure(&roots).into_iter().cloned().collect();
        let main_file = main_file(&closure).unwrap_or_default();

        for file in &closure {
            self.persist(file).await?;
        }

        Ok(ResolvedSymbol {
            main_file,
            files: closure.iter().map(|f| f.name().to_string()).collect(),
        })
    }

    /// Discovers every service of the server.
    #[tracing::instrument(skip(self), fields(session = %self.id))]
    pub async fn discover_all(&mut self) -> Result<Discovery, DiscoveryError> {
        let names = self.client.list_services().await?;
        tracing::debug!(count = names.len(), "listed services via reflection");

        let mut services = BTreeMap::new();

        for full_name in names {
            let resolved = self.resolve_symbol(&full_name).await?;
            let schema = self.schema_of(&resolved.files)?;
            let mut methods = describe(&schema, &full_name)?;
            methods.service = reflection_short_name(&full_name).to_string();

            let proto_path = self.root_dir().join(&resolved.main_file);
            if let Some(main) = self
                .bundle
                .include_files
                .iter()
                .find(|f| f.path == proto_path)
            {
                self.bundle.proto_content = main.proto.clone();
            }
            self.bundle.proto_path = proto_path.clone();

            services.insert(
                full_name,
                DiscoveredService {
                    methods,
                    proto_path,
                },
            );
        }

        Ok(Discovery {
            services,
            protos: self.bundle.clone(),
        })
    }

    /// Synthesizes a request body for `service`/`method` from the reflected schema.
    pub async fn mock_request(
        &mut self,
        service: &str,
        method: &str,
    ) -> Result<serde_json::Value, DiscoveryError> {
        let fetched = self
            .client
            .file_descriptors_by_symbol(service, &self.cache.names())
            .await?;
        let roots: Vec<String> = fetched.iter().map(|f| f.name().to_string()).collect();
        for file in fetched {
            self.cache.insert(file);
        }

        let schema = self.schema_of(&roots)?;
        Ok(catalog::mock_request(&schema, service, method)?)
    }

    fn schema_of(&self, roots: &[String]) -> Result<SchemaRoot, DiscoveryError> {
        let file = self.cache.closure(roots).into_iter().cloned().collect();
        let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file })?;
        Ok(SchemaRoot::from_pool(pool))
    }

    async fn persist(&mut self, file: &FileDescriptorProto) -> Result<(), DiscoveryError> {
        let relative = safe_relative_path(file.name())?;
        let root = self.root_dir();
        let path = root.join(&relative);

        if self.bundle.include_files.iter().any(|f| f.path == path) {
            return Ok(());
        }

        let dir = path.parent().map_or_else(|| root.clone(), Path::to_path_buf);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| DiscoveryError::Io {
                path: dir.clone(),
                source,
            })?;

        let proto = to_proto_source(file);
        tokio::fs::write(&path, &proto)
            .await
            .map_err(|source| DiscoveryError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "materialized proto file");

        if self.bundle.include_dirs.is_empty() {
            self.bundle.include_dirs.push(root);
        }
        if !self.bundle.include_dirs.contains(&dir) {
            self.bundle.include_dirs.push(dir);
        }

        self.bundle.include_files.push(IncludeFile {
            name: relative
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            relative_path: path
                .strip_prefix(&self.base_dir)
                .map_or_else(|_| relative.clone(), Path::to_path_buf),
            path,
            proto,
        });

        Ok(())
    }
}

/// Discovers every service of `target` in a fresh session rooted at the system temporary
/// directory.
#[tracing::instrument(skip(target), fields(address = %target.address))]
pub async fn discover_all(
    target: &TargetEndpoint,
    session_id: &str,
) -> Result<Discovery, DiscoveryError> {
    ReflectionSession::connect(target, session_id)
        .await?
        .discover_all()
        .await
}

/// Synthesizes a request body for `service`/`method` using the schema `target` reflects.
pub async fn mock_request_by_reflection(
    target: &TargetEndpoint,
    service: &str,
    method: &str,
) -> Result<serde_json::Value, DiscoveryError> {
    let channel = invoker::connect(target).await?;
    let fd_set = ReflectionClient::new(channel)
        .file_descriptor_set_by_symbol(service)
        .await?;

    let schema = SchemaRoot::from_file_descriptor_set(fd_set)?;
    Ok(catalog::mock_request(&schema, service, method)?)
}

fn describe(schema: &SchemaRoot, full_name: &str) -> Result<ServiceMethods, DiscoveryError> {
    let service = catalog::find_service(schema, full_name)?;
    Ok(catalog::describe_service(
        &service,
        &mut MockSynthesizer::new(),
    ))
}

/// The file of `files` that none of the others import. When several qualify the first wins.
pub fn main_file(files: &[FileDescriptorProto]) -> Option<String> {
    let imported: HashSet<&str> = files
        .iter()
        .flat_map(|f| f.dependency.iter().map(String::as_str))
        .collect();

    files
        .iter()
        .map(FileDescriptorProto::name)
        .find(|name| !imported.contains(name))
        .map(str::to_string)
}

fn validate_session_id(id: &str) -> Result<String, DiscoveryError> {
    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !id.contains(['/', '\\']) => Ok(id.to_string()),
        _ => Err(DiscoveryError::InvalidSessionId(id.to_string())),
    }
}

fn safe_relative_path(name: &str) -> Result<PathBuf, DiscoveryError> {
    let path = Path::new(name);
    let safe = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if safe {
        Ok(path.to_path_buf())
    } else {
        Err(DiscoveryError::UnsafeFileName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, deps: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            dependency: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn short_name_drops_the_first_segment_only() {
        assert_eq!(reflection_short_name("demo.v1.Greeter"), "v1.Greeter");
        assert_eq!(reflection_short_name("echo.EchoService"), "EchoService");
        assert_eq!(reflection_short_name("Bare"), "Bare");
    }

    #[test]
    fn main_file_is_the_one_nobody_imports() {
        let files = vec![
            file("google/protobuf/timestamp.proto", &[]),
            file("echo/labels.proto", &[]),
            file(
                "echo.proto",
                &["echo/labels.proto", "google/protobuf/timestamp.proto"],
            ),
        ];

        assert_eq!(main_file(&files).as_deref(), Some("echo.proto"));
        assert_eq!(main_file(&[]), None);
    }

    #[test]
    fn closure_follows_imports_once() {
        let mut cache = ReflectionCache::default();
        cache.insert(file("a.proto", &["b.proto", "c.proto"]));
        cache.insert(file("b.proto", &["c.proto"]));
        cache.insert(file("c.proto", &[]));
        cache.insert(file("unrelated.proto", &[]));

        let names: Vec<_> = cache
            .closure(&["a.proto".to_string()])
            .into_iter()
            .map(|f| f.name().to_string())
            .collect();

        assert_eq!(names, vec!["a.proto", "b.proto", "c.proto"]);
    }

    #[test]
    fn cache_entries_are_never_replaced() {
        let mut cache = ReflectionCache::default();
        cache.insert(file("a.proto", &[]));
        cache.insert(file("a.proto", &["b.proto"]));

        assert_eq!(cache.len(), 1);
        assert!(cache.get("a.proto").unwrap().dependency.is_empty());
    }

    #[test]
    fn session_ids_and_file_names_stay_inside_the_session_directory() {
        assert!(validate_session_id("target-42").is_ok());
        assert!(validate_session_id("../escape").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("..").is_err());

        assert!(safe_relative_path("echo/labels.proto").is_ok());
        assert!(safe_relative_path("/etc/passwd").is_err());
        assert!(safe_relative_path("../up.proto").is_err());
        assert!(safe_relative_path("").is_err());
    }
}
