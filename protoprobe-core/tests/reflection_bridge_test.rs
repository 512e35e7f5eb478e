use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use protoprobe_core::catalog::{self, StreamFlag};
use protoprobe_core::reflection::bridge::{DiscoveryError, ReflectionSession};
use protoprobe_core::reflection::client::ReflectionResolveError;
use std::path::Path;
use tonic::Code;
use tonic_reflection::server::v1::ServerReflectionServer;


fn setup_session(
    session_id: &str,
    base_dir: &Path,
) -> ReflectionSession<ServerReflectionServer<impl tonic_reflection::server::v1::ServerReflection>> {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .include_reflection_service(false)
        .build_v1()
        .expect("Failed to setup Reflection Service");

    ReflectionSession::new(reflection_service, session_id)
        .expect("Invalid session id")
        .with_base_dir(base_dir)
}

#[tokio::test]
async fn test_discover_all_describes_and_materializes_services() {
    let base = tempfile::tempdir().unwrap();
    let mut session = setup_session("target-1", base.path());

    let discovery = session.discover_all().await.expect("Discovery failed");

    let echo = discovery
        .services
        .get("echo.EchoService")
        .expect("EchoService not discovered");
    assert_eq!(echo.methods.service, "EchoService");

    let flags: Vec<_> = echo
        .methods
        .methods
        .iter()
        .map(|m| (m.name.as_str(), m.request_stream, m.response_stream))
        .collect();
    assert_eq!(
        flags,
        vec![
            ("UnaryEcho", StreamFlag::Single, StreamFlag::Single),
            ("ServerStreamingEcho", StreamFlag::Single, StreamFlag::Streaming),
            ("ClientStreamingEcho", StreamFlag::Streaming, StreamFlag::Single),
            ("BidirectionalEcho", StreamFlag::Streaming, StreamFlag::Streaming),
        ]
    );
    assert!(echo.methods.methods[0].request_body["message"].is_string());

    let root = base.path().join("protos").join("target-1");
    let protos = &discovery.protos;

    assert_eq!(protos.proto_path, root.join("echo.proto"));
    assert_eq!(echo.proto_path, root.join("echo.proto"));
    assert!(protos.proto_content.contains("service EchoService {"));
    assert_eq!(protos.include_dirs[0], root);

    for name in [
        "echo.proto",
        "echo/labels.proto",
        "google/protobuf/timestamp.proto",
    ] {
        assert!(root.join(name).is_file(), "{name} was not written");
    }

    let labels = protos
        .include_files
        .iter()
        .find(|f| f.name == "labels.proto")
        .expect("labels.proto missing from bundle");
    assert_eq!(labels.path, root.join("echo/labels.proto"));
    assert_eq!(
        labels.relative_path,
        Path::new("protos").join("target-1").join("echo/labels.proto")
    );
    assert!(labels.proto.contains("enum Priority {"));
}

#[tokio::test]
async fn test_materialized_bundle_reloads_with_the_same_services() {
    let base = tempfile::tempdir().unwrap();
    let mut session = setup_session("reload", base.path());

    let discovery = session.discover_all().await.expect("Discovery failed");
    let schema = discovery.load_schema().expect("Bundle failed to compile");

    let reloaded = catalog::list_methods(&schema, "echo.EchoService").expect("Service missing");
    let names: Vec<_> = reloaded.methods.iter().map(|m| m.name.as_str()).collect();
    let discovered: Vec<_> = discovery.services["echo.EchoService"]
        .methods
        .methods
        .iter()
        .map(|m| m.name.as_str())
        .collect();

    assert_eq!(names, discovered);

    let request = schema.get_message("echo.EchoRequest").expect("EchoRequest missing");
    assert!(request.get_field_by_name("sent_at").is_some());
    assert!(request.get_field_by_name("labels").is_some());
}

#[tokio::test]
async fn test_resolving_a_symbol_twice_is_idempotent() {
    let base = tempfile::tempdir().unwrap();
    let mut session = setup_session("twice", base.path());

    let first = session.resolve_symbol("echo.EchoService").await.unwrap();
    let bundle = session.bundle().clone();
    let cached = session.cache().len();

    let second = session.resolve_symbol("echo.EchoService").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.main_file, "echo.proto");
    assert_eq!(first.files.len(), 3);
    assert_eq!(session.bundle(), &bundle);
    assert_eq!(session.cache().len(), cached);
}

#[tokio::test]
async fn test_sessions_do_not_share_state() {
    let base = tempfile::tempdir().unwrap();
    let mut first = setup_session("first", base.path());
    let second = setup_session("", base.path());

    first.resolve_symbol("echo.EchoService").await.unwrap();

    assert!(!second.id().is_empty());
    assert_ne!(second.root_dir(), first.root_dir());
    assert!(second.cache().is_empty());
    assert!(second.bundle().include_files.is_empty());
}

#[tokio::test]
async fn test_mock_request_from_reflected_schema() {
    let base = tempfile::tempdir().unwrap();
    let mut session = setup_session("mock", base.path());

    let body = session
        .mock_request("echo.EchoService", "UnaryEcho")
        .await
        .expect("Mock failed");

    assert!(body["message"].is_string());
    assert!(body["labels"]["tags"].is_array());

    let err = session
        .mock_request("echo.EchoService", "Nope")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Service echo.EchoService does NOT have a method named Nope."
    );
}

#[tokio::test]
async fn test_discovery_fails_without_reflection() {
    let base = tempfile::tempdir().unwrap();
    let server = EchoServiceServer::new(EchoServiceImpl::default());
    let mut session = ReflectionSession::new(server, "no-reflection")
        .unwrap()
        .with_base_dir(base.path());

    let err = session.discover_all().await.unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::Reflection(ReflectionResolveError::ServerStreamInitFailed(status))
            if status.code() == Code::Unimplemented
    ));
    assert!(!base.path().join("protos").exists());
}

#[test]
fn test_session_id_must_be_a_single_segment() {
    let server = EchoServiceServer::new(EchoServiceImpl::default());

    assert!(matches!(
        ReflectionSession::new(server, "../outside"),
        Err(DiscoveryError::InvalidSessionId(_))
    ));
}
