//! Cross-cutting tests for the JSON-RPC layer.
