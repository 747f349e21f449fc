// cue-test-utils: shared test helpers for the cue bus suite.
//
// Provides a WebSocket listen client for integration testing of the server's
// fan-out path without pulling a real CLI into the test harness.

pub mod listen_client;

pub use listen_client::ListenClient;
