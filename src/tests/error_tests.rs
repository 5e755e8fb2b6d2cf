//! Tests for the error module.
//!
//! This module contains tests for error handling and error types.

use crate::error::{
    report_error, set_error_reporter, ErrorContext, ErrorReporter, HandshakeError, KaulaError,
    ServiceError, TracingErrorReporter, TransportError,
};
use crate::protocol::jsonrpc::{CorrelationError, DecodeError, ErrorCode, Id, JsonRpcError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Test that error context can be created and displayed properly.
#[test]
fn test_error_context_display() {
    let error = KaulaError::Custom("test error".to_string());
    let context = ErrorContext::new(error, "test_component").with_details("additional details");

    let display_string = format!("{context}");
    assert!(display_string.contains("test error"));
    assert!(display_string.contains("test_component"));
    assert!(display_string.contains("additional details"));
}

/// Test that nested errors work correctly.
#[test]
fn test_nested_errors() {
    let io_error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let kaula_error: KaulaError = ServiceError::from(TransportError::from(io_error)).into();

    let error_string = format!("{kaula_error}");
    assert!(error_string.contains("pipe closed"));
}

#[test]
fn test_only_decode_errors_are_non_fatal() {
    assert!(!TransportError::Decode(DecodeError::NotAnObject).is_fatal());
    assert!(TransportError::Closed.is_fatal());
    assert!(TransportError::Sse("reset".to_string()).is_fatal());
}

#[test]
fn test_correlation_errors_map_to_service_errors() {
    assert!(matches!(
        ServiceError::from(CorrelationError::DuplicateId(Id::Number(1))),
        ServiceError::DuplicateId(Id::Number(1))
    ));
    let closed = ServiceError::from(CorrelationError::SessionClosed("gone".to_string()));
    assert!(closed.is_closed());
    assert!(ServiceError::from(CorrelationError::ChannelClosed).is_closed());
}

#[test]
fn test_service_error_codes() {
    let remote = ServiceError::Remote(JsonRpcError::method_not_found("tools/call"));
    assert!(remote.is_method_not_found());
    assert_eq!(remote.error_code(), Some(ErrorCode::MethodNotFound.code()));

    let handler = ServiceError::Handler(JsonRpcError::internal_error("boom"));
    assert_eq!(handler.error_code(), Some(-32603));
    assert!(!handler.is_method_not_found());

    assert_eq!(ServiceError::Timeout(Duration::from_secs(1)).error_code(), None);
}

#[test]
fn test_handshake_error_display() {
    let error = HandshakeError::IdMismatch {
        expected: Id::Number(1),
        actual: Id::String("1".to_string()),
    };
    let message = error.to_string();
    assert!(message.contains("1"));
    assert!(message.contains("initialize"));
}

/// Reporter that records the components it was called for.
#[derive(Debug, Default)]
struct RecordingReporter {
    components: Mutex<Vec<String>>,
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, context: ErrorContext) {
        self.components.lock().push(context.component);
    }
}

/// Test that the global error reporter works correctly.
#[test]
fn test_global_error_reporter() {
    let reporter = Arc::new(RecordingReporter::default());
    set_error_reporter(reporter.clone());

    report_error(ErrorContext::new(
        KaulaError::Custom("test error".to_string()),
        "error_tests",
    ));

    // Other tests may report concurrently through the same global
    assert!(reporter
        .components
        .lock()
        .iter()
        .any(|component| component == "error_tests"));
    set_error_reporter(Arc::new(TracingErrorReporter));
}

/// Test that the default tracing error reporter can be used.
#[test]
fn test_tracing_error_reporter() {
    let reporter = TracingErrorReporter;
    let context = ErrorContext::new(TransportError::Closed, "test_component").with_span_trace();
    reporter.report(context);
}
