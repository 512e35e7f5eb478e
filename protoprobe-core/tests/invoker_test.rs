use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use futures_util::StreamExt;
use prost_reflect::DescriptorPool;
use protoprobe_core::call_kind::CallKind;
use protoprobe_core::catalog::CatalogError;
use protoprobe_core::config::TargetEndpoint;
use protoprobe_core::invoker::{self, CallOutcome, InvokeError, Invoker, RequestHeader};
use protoprobe_core::schema::SchemaRoot;
use serde_json::json;
use tonic::Code;


const SERVICE: &str = "echo.EchoService";

fn echo_schema() -> SchemaRoot {
    let pool = DescriptorPool::decode(FILE_DESCRIPTOR_SET).expect("Failed to decode descriptors");
    SchemaRoot::from_pool(pool)
}

fn setup_invoker(service: EchoServiceImpl, retry: u32) -> Invoker<EchoServiceServer<EchoServiceImpl>> {
    Invoker::from_service(EchoServiceServer::new(service), echo_schema(), retry)
}

#[tokio::test]
async fn test_unary_call_returns_envelope() {
    let mut invoker = setup_invoker(EchoServiceImpl::default(), 1);
    let headers = vec![
        RequestHeader::new(" x-user ", " alice "),
        RequestHeader::disabled("x-ignored", "nope"),
        RequestHeader::new("  ", "no key"),
    ];

    let outcome = invoker
        .invoke(SERVICE, "UnaryEcho", &headers, json!({ "message": "hello" }))
        .await
        .expect("Unary call failed");
    assert_eq!(outcome.kind(), CallKind::Unary);

    let CallOutcome::Unary(result) = outcome else {
        panic!("Expected a unary outcome");
    };

    assert_eq!(result.result, json!({ "message": "hello" }));
    assert_eq!(result.status.code, 0);
    assert_eq!(result.status.details, "OK");

    let traces: Vec<_> = result
        .metadata
        .iter()
        .filter(|entry| entry.key == "x-trace")
        .map(|entry| entry.value.as_str())
        .collect();
    assert_eq!(traces, vec!["first", "second"]);

    assert!(
        result
            .metadata
            .iter()
            .any(|entry| entry.key == "x-echoed-user" && entry.value == "alice")
    );
}

#[tokio::test]
async fn test_unary_call_is_retried() {
    let service = EchoServiceImpl::failing(1);
    let mut invoker = setup_invoker(service.clone(), 1);

    let outcome = invoker
        .invoke(SERVICE, "UnaryEcho", &[], json!({ "message": "again" }))
        .await
        .expect("Retry should have recovered");

    assert!(matches!(outcome, CallOutcome::Unary(r) if r.result["message"] == "again"));
    assert_eq!(service.unary_calls(), 2);
}

#[tokio::test]
async fn test_unary_status_is_passed_through_without_retries() {
    let service = EchoServiceImpl::failing(1);
    let mut invoker = setup_invoker(service.clone(), 0);

    let err = invoker
        .invoke(SERVICE, "UnaryEcho", &[], json!({ "message": "once" }))
        .await
        .unwrap_err();

    match err {
        InvokeError::Rpc(status) => {
            assert_eq!(status.code(), Code::Unavailable);
            assert_eq!(status.message(), "echo is warming up");
        }
        other => panic!("Expected an RPC error, got {other:?}"),
    }
    assert_eq!(service.unary_calls(), 1);
}

#[tokio::test]
async fn test_server_stream_handle() {
    let mut invoker = setup_invoker(EchoServiceImpl::default(), 1);

    let outcome = invoker
        .invoke(SERVICE, "ServerStreamingEcho", &[], json!({ "message": "tick" }))
        .await
        .expect("Server streaming call failed");

    let CallOutcome::Streaming(handle) = outcome else {
        panic!("Expected a stream handle");
    };
    assert_eq!(handle.kind(), CallKind::ServerStream);
    assert!(handle.send(json!({ "message": "late" })).await.is_err());

    let messages: Vec<_> = handle
        .map(|item| item.expect("stream item failed")["message"].clone())
        .collect()
        .await;

    assert_eq!(
        messages,
        vec![json!("tick - seq 0"), json!("tick - seq 1"), json!("tick - seq 2")]
    );
}

#[tokio::test]
async fn test_client_stream_handle_is_seeded_from_body() {
    let mut invoker = setup_invoker(EchoServiceImpl::default(), 1);

    let outcome = invoker
        .invoke(
            SERVICE,
            "ClientStreamingEcho",
            &[],
            json!([{ "message": "a" }, { "message": "b" }]),
        )
        .await
        .expect("Client streaming call failed");

    let CallOutcome::Streaming(mut handle) = outcome else {
        panic!("Expected a stream handle");
    };
    assert_eq!(handle.kind(), CallKind::ClientStream);

    handle
        .send(json!({ "message": "c" }))
        .await
        .expect("Failed to send");
    handle.close_send();
    assert!(handle.send(json!({ "message": "d" })).await.is_err());

    let response = handle
        .next()
        .await
        .expect("Missing response")
        .expect("Call failed");

    assert_eq!(response, json!({ "message": "abc" }));
    assert!(handle.next().await.is_none());
}

#[tokio::test]
async fn test_bidi_stream_handle() {
    let mut invoker = setup_invoker(EchoServiceImpl::default(), 1);

    let outcome = invoker
        .invoke(SERVICE, "BidirectionalEcho", &[], json!(null))
        .await
        .expect("Bidirectional call failed");

    let CallOutcome::Streaming(mut handle) = outcome else {
        panic!("Expected a stream handle");
    };
    assert_eq!(handle.kind(), CallKind::BidiStream);

    for word in ["ping", "pong"] {
        handle
            .send(json!({ "message": word }))
            .await
            .expect("Failed to send");
        let reply = handle.next().await.expect("Missing reply").expect("Reply failed");
        assert_eq!(reply["message"], format!("echo: {word}"));
    }

    handle.close_send();
    assert!(handle.next().await.is_none());
}

#[tokio::test]
async fn test_invalid_body_is_rejected_before_sending() {
    let service = EchoServiceImpl::default();
    let mut invoker = setup_invoker(service.clone(), 0);

    let err = invoker
        .invoke(SERVICE, "UnaryEcho", &[], json!({ "message": 42, "nope": true }))
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::InvalidInput(_)), "got {err:?}");
    assert_eq!(service.unary_calls(), 0);

    let err = invoker
        .invoke(SERVICE, "BidirectionalEcho", &[], json!("text"))
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::InvalidInput(_)), "got {err:?}");
}

#[tokio::test]
async fn test_missing_method_fails_before_any_network_io() {
    // Nothing listens on port 1: reaching the network would surface a transport error.
    let target = TargetEndpoint::insecure("127.0.0.1:1");

    let err = invoker::invoke(
        &target,
        &echo_schema(),
        SERVICE,
        "ShoutEcho",
        &[],
        json!({}),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        &err,
        InvokeError::Lookup(CatalogError::MethodNotFound { .. })
    ));
    assert_eq!(
        err.to_string(),
        "Service echo.EchoService does NOT have a method named ShoutEcho."
    );
}

#[tokio::test]
async fn test_unreachable_target_is_a_transport_error() {
    let target = TargetEndpoint::insecure("127.0.0.1:1");

    let err = invoker::invoke(
        &target,
        &echo_schema(),
        SERVICE,
        "UnaryEcho",
        &[],
        json!({ "message": "hi" }),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, InvokeError::Transport(..)), "got {err:?}");
}
