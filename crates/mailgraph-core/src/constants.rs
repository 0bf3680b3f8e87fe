/// Application constants
///
/// This module contains all hardcoded values used throughout the application.
/// Constants are organized by category for easy maintenance.
// ============================================================================
// Sync Constants
// ============================================================================
/// Default rolling window in months
pub const DEFAULT_WINDOW_MONTHS: u32 = 3;

/// Overlap subtracted from the last sync cursor to tolerate clock skew and
/// late-arriving messages
pub const DEFAULT_OVERLAP_WINDOW_HOURS: u32 = 24;

/// Bounded retries for transient provider errors within a single sync
pub const SYNC_MAX_TRANSIENT_RETRIES: u32 = 3;

/// Page size requested from providers when listing messages
pub const SYNC_LIST_PAGE_SIZE: u32 = 100;

// ============================================================================
// Qualification Constants
// ============================================================================

/// Body prefix scanned by the Stage 1 keyword gate
pub const QUALIFY_BODY_SCAN_BYTES: usize = 2048;

/// Body prefix forwarded to the Stage 2 LLM adjudicator
pub const QUALIFY_LLM_BODY_BYTES: usize = 4096;

/// Confidence recorded for deterministic Stage 1 decisions
pub const QUALIFY_KEYWORD_CONFIDENCE: f64 = 0.9;

// ============================================================================
// Job Queue Constants
// ============================================================================

/// Queue lane names in descending priority order
pub const LANE_ATTACHMENTS: &str = "attachments";
pub const LANE_DOCUMENTS: &str = "documents";
pub const LANE_DEFAULT: &str = "default";

/// Visibility lease duration in seconds (matches the hard time limit)
pub const JOB_LEASE_SECONDS: i64 = 600;

/// Base delay for job retry backoff in seconds
pub const JOB_BACKOFF_BASE_SECONDS: u64 = 60;

/// Cap for job retry backoff in seconds (30 minutes)
pub const JOB_BACKOFF_CAP_SECONDS: u64 = 30 * 60;

/// Jitter factor applied to job backoff (0.0 to 1.0)
pub const JOB_BACKOFF_JITTER_FACTOR: f64 = 0.1;

/// Maximum attempts before a job lands in the failed terminal state
pub const JOB_MAX_ATTEMPTS: u32 = 5;

/// Default worker pool concurrency
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Soft per-job time limit in seconds
pub const DEFAULT_SOFT_TIME_LIMIT_SECONDS: u64 = 540;

/// Hard per-job time limit in seconds
pub const DEFAULT_HARD_TIME_LIMIT_SECONDS: u64 = 600;

/// Attachments-lane depth at which the sync coordinator stops enqueuing
pub const QUEUE_HIGH_WATER_MARK: u64 = 500;

/// Attachments-lane depth at which enqueues resume
pub const QUEUE_LOW_WATER_MARK: u64 = 100;

// ============================================================================
// Extraction Constants
// ============================================================================

/// Minimum embedded-text length accepted from the free PDF extractor
pub const PDF_TEXT_MIN_CHARS: usize = 100;

/// Minimum printable-character ratio accepted from the free PDF extractor
pub const PDF_TEXT_MIN_PRINTABLE_RATIO: f64 = 0.8;

/// Minimum field confidence for a template application to be accepted
pub const TEMPLATE_MIN_CONFIDENCE: f64 = 0.7;

/// Consecutive verification failures before a template is invalidated
pub const TEMPLATE_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Days a template may sit idle before expiry
pub const DEFAULT_TEMPLATE_TTL_DAYS: u32 = 90;

// ============================================================================
// LLM Constants
// ============================================================================

/// Consecutive LLM failures within the window that open the circuit breaker
pub const LLM_BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Window in which consecutive failures are counted, in seconds
pub const LLM_BREAKER_WINDOW_SECONDS: u64 = 60;

/// Cool-off after the breaker opens, in seconds (5 minutes)
pub const LLM_BREAKER_COOLOFF_SECONDS: u64 = 5 * 60;

/// Reformatting attempts before a malformed LLM response is permanent
pub const LLM_MAX_REFORMAT_ATTEMPTS: u32 = 2;

/// Per-call timeout for LLM requests in seconds
pub const LLM_TIMEOUT_SECONDS: u64 = 60;

// ============================================================================
// Provider Constants
// ============================================================================

/// Per-call timeout for provider requests in seconds
pub const PROVIDER_TIMEOUT_SECONDS: u64 = 30;

/// Gmail quota units per second
pub const GMAIL_QUOTA_UNITS_PER_SECOND: f64 = 250.0;

/// Default request rate for non-Gmail providers (requests per second)
pub const DEFAULT_PROVIDER_RATE_PER_SECOND: f64 = 10.0;

/// Default token-bucket burst capacity
pub const DEFAULT_RATE_LIMIT_BURST: f64 = 20.0;

/// How long a rate-limited request blocks before surfacing an error
pub const RATE_LIMIT_ACQUIRE_TIMEOUT_SECONDS: u64 = 10;

/// Safety margin under which an access token is refreshed before use
pub const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;

// ============================================================================
// Size Limits
// ============================================================================

/// Maximum size per attachment downloaded for extraction (35 MB)
pub const MAX_ATTACHMENT_SIZE_BYTES: usize = 35 * 1024 * 1024;

// ============================================================================
// Security Constants
// ============================================================================

/// Blocked file extensions; attachments with these are never stored
pub const BLOCKED_FILE_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "pif", "scr", "vbs", "js", "jar", "msi", "app", "deb", "rpm",
];

/// Blocked content types; attachments with these are never stored
pub const BLOCKED_CONTENT_TYPES: &[&str] = &[
    "application/x-executable",
    "application/x-msdownload",
    "application/x-msdos-program",
    "application/x-sh",
    "application/x-shellscript",
];

// ============================================================================
// Supported Attachment Types
// ============================================================================

/// MIME types the extraction pipeline accepts as documents
pub const SUPPORTED_DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/tiff",
    "image/webp",
    "image/bmp",
];

/// Extensions used when the declared MIME type is absent or generic
pub const SUPPORTED_DOCUMENT_EXTENSIONS: &[&str] =
    &["pdf", "jpg", "jpeg", "png", "tif", "tiff", "webp", "bmp"];

// ============================================================================
// Skip Reasons
// ============================================================================

pub const SKIP_REASON_SCANNED_PDF: &str = "scanned_pdf_skipped_by_cost_policy";
pub const SKIP_REASON_IMAGE: &str = "image_skipped_by_cost_policy";
pub const SKIP_REASON_OUT_OF_SCOPE: &str = "out_of_scope";
pub const SKIP_REASON_DUPLICATE: &str = "duplicate";
