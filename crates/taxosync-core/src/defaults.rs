//! Centralized default constants for taxosync.
//!
//! Remote limits mirror what the taxonomy service enforces server-side; the
//! validator checks them up front so a run never fails halfway through.

// =============================================================================
// REMOTE LIMITS
// =============================================================================

/// Maximum number of concept schemes per organization.
pub const MAX_CONCEPT_SCHEMES: usize = 20;

/// Maximum number of concepts per organization.
pub const MAX_CONCEPTS: usize = 6000;

/// Maximum number of concepts referenced by a single scheme.
pub const MAX_CONCEPTS_PER_SCHEME: usize = 2000;

/// Maximum length of a resource URI.
pub const MAX_URI_LENGTH: usize = 500;

/// Maximum length of any label, notation or preferred label.
pub const MAX_LABEL_LENGTH: usize = 256;

/// Maximum number of alternative (or hidden) labels per locale.
pub const MAX_LABELS_PER_LOCALE: usize = 20;

/// Maximum number of broader (or related) links per concept.
pub const MAX_RELATIONS: usize = 5;

// =============================================================================
// REMOTE API
// =============================================================================

/// Default management API base URL.
pub const API_BASE_URL: &str = "https://api.contentful.com";

/// Content type for create/replace/delete bodies.
pub const CONTENT_TYPE_MANAGEMENT: &str = "application/vnd.contentful.management.v1+json";

/// Content type for JSON-Patch bodies.
pub const CONTENT_TYPE_JSON_PATCH: &str = "application/json-patch+json";

/// Header carrying the optimistic-concurrency version token.
pub const VERSION_HEADER: &str = "x-contentful-version";

/// `sys.id` of a rate-limit error body.
pub const RATE_LIMIT_ERROR_ID: &str = "RateLimitExceeded";

/// Substring of `details` on a create rejected for a duplicate URI.
pub const URI_CONFLICT_DETAILS: &str = "URI already exists";

/// Page size for list requests (server maximum).
pub const PAGE_LIMIT: usize = 1000;

/// Per-request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Requests slower than this are logged at WARN.
pub const SLOW_REQUEST_THRESHOLD_MS: u64 = 5000;

// =============================================================================
// RATE LIMITING & CONCURRENCY
// =============================================================================

/// Retries on a rate-limit response before the call is reported as failed.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 20;

/// Pause between rate-limit retries in milliseconds.
pub const RATE_LIMIT_SLEEP_MS: u64 = 1100;

/// In-flight create/replace calls during the creation phases.
pub const MAX_PARALLEL_REQUESTS: usize = 2;

// =============================================================================
// LOCALES
// =============================================================================

/// Locale assumed when the remote reports no default.
pub const DEFAULT_LOCALE: &str = "en-US";
