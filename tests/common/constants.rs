//! Shared constants for end-to-end tests
//!
//! When test data changes (tokens, fake upstream replies, timings),
//! update only this file.

// ============================================================================
// Test Principals
// ============================================================================

/// Owner id of the main test user
pub const TEST_USER: &str = "user-alice";

/// Bearer token resolving to `TEST_USER`
pub const TEST_TOKEN: &str = "alice-token";

/// Owner id of a second user, used for ownership checks
pub const OTHER_USER: &str = "user-bob";

/// Bearer token resolving to `OTHER_USER`
pub const OTHER_TOKEN: &str = "bob-token";

// ============================================================================
// Fake Upstream Behaviour
// ============================================================================

/// Reply returned by the fake chat model for non-streamed requests
pub const FAKE_COMPLETION: &str = "Hello from the fake model";

/// Deltas the fake chat model streams, in order
pub const FAKE_STREAM_DELTAS: [&str; 3] = ["Once ", "upon ", "a time"];

/// Model id sent with chat creation requests
pub const TEST_MODEL: &str = "test/model";

/// Output URL of every successful fake prediction
pub const FAKE_IMAGE_URL: &str = "http://images.invalid/out.png";

/// One transparent pixel, as served by the fake file endpoint
pub const PIXEL_PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

// ============================================================================
// Timeouts
// ============================================================================

/// Ceiling for inline image requests in the test server
pub const SYNC_TIMEOUT_MS: u64 = 1_500;

/// Poll interval the test server uses against the fake prediction API
pub const PREDICTION_POLL_INTERVAL_MS: u64 = 20;

/// Maximum time to wait for the server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5_000;

/// Interval between readiness checks
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Default timeout for HTTP requests in tests
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Upper bound when polling for a job to reach a terminal state
pub const JOB_WAIT_TIMEOUT_MS: u64 = 5_000;
