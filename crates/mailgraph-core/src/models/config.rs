/// Configuration models
use crate::constants::{
    DEFAULT_HARD_TIME_LIMIT_SECONDS, DEFAULT_OVERLAP_WINDOW_HOURS, DEFAULT_RATE_LIMIT_BURST,
    DEFAULT_SOFT_TIME_LIMIT_SECONDS, DEFAULT_TEMPLATE_TTL_DAYS, DEFAULT_WINDOW_MONTHS,
    DEFAULT_WORKER_CONCURRENCY, QUEUE_HIGH_WATER_MARK, QUEUE_LOW_WATER_MARK,
};
use crate::error::MailgraphError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// System configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailgraphConfig {
    /// SQLite connection string, e.g. `sqlite://mailgraph.db`
    pub database_url: String,
    /// Root directory of the content-addressed blob store
    pub storage_root: PathBuf,
    pub sync: SyncConfig,
    pub worker: WorkerConfig,
    pub llm: LlmConfig,
    pub oauth: OAuthConfig,
    pub cost_policy: CostPolicy,
    #[serde(default = "default_template_ttl_days")]
    pub template_ttl_days: u32,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: f64,
    /// Hex-encoded 32-byte AES-256-GCM key for credentials at rest
    pub credential_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_window_months")]
    pub window_months: u32,
    /// 0 = unlimited; counts newly-created messages
    #[serde(default)]
    pub max_emails_per_sync: u32,
    #[serde(default = "default_overlap_window_hours")]
    pub overlap_window_hours: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_months: DEFAULT_WINDOW_MONTHS,
            max_emails_per_sync: 0,
            overlap_window_hours: DEFAULT_OVERLAP_WINDOW_HOURS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_soft_time_limit_s")]
    pub soft_time_limit_s: u64,
    #[serde(default = "default_hard_time_limit_s")]
    pub hard_time_limit_s: u64,
    #[serde(default = "default_queue_high_water_mark")]
    pub queue_high_water_mark: u64,
    #[serde(default = "default_queue_low_water_mark")]
    pub queue_low_water_mark: u64,
    /// Optional running-job cap per lane; absent lanes are uncapped
    #[serde(default)]
    pub lane_caps: std::collections::HashMap<String, u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            soft_time_limit_s: DEFAULT_SOFT_TIME_LIMIT_SECONDS,
            hard_time_limit_s: DEFAULT_HARD_TIME_LIMIT_SECONDS,
            queue_high_water_mark: QUEUE_HIGH_WATER_MARK,
            queue_low_water_mark: QUEUE_LOW_WATER_MARK,
            lane_caps: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat-completions endpoint base URL
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_per_user_rpm")]
    pub llm_per_user_rpm: u32,
    #[serde(default = "default_llm_global_rpm")]
    pub llm_global_rpm: u32,
    #[serde(default = "default_llm_daily_user_dollar_cap")]
    pub llm_daily_user_dollar_cap: f64,
    #[serde(default = "default_llm_per_document_dollar_cap")]
    pub llm_per_document_dollar_cap: f64,
    /// Pricing used for advisory cost accounting, dollars per 1K tokens
    #[serde(default = "default_prompt_price")]
    pub prompt_price_per_1k: f64,
    #[serde(default = "default_completion_price")]
    pub completion_price_per_1k: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen2.5:14b".to_string(),
            api_key: None,
            llm_per_user_rpm: 10,
            llm_global_rpm: 60,
            llm_daily_user_dollar_cap: 5.0,
            llm_per_document_dollar_cap: 0.25,
            prompt_price_per_1k: 0.00025,
            completion_price_per_1k: 0.00125,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthConfig {
    pub public_protocol: String,
    pub public_domain: String,
    #[serde(default)]
    pub gmail_client_id: String,
    #[serde(default)]
    pub gmail_client_secret: String,
    #[serde(default)]
    pub outlook_client_id: String,
    #[serde(default)]
    pub outlook_client_secret: String,
    #[serde(default = "default_outlook_tenant")]
    pub outlook_tenant: String,
}

impl OAuthConfig {
    /// Redirect URI handed to providers during the authorization-code flow
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}://{}/api/auth/callback",
            self.public_protocol, self.public_domain
        )
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            public_protocol: "https".to_string(),
            public_domain: "localhost".to_string(),
            gmail_client_id: String::new(),
            gmail_client_secret: String::new(),
            outlook_client_id: String::new(),
            outlook_client_secret: String::new(),
            outlook_tenant: "common".to_string(),
        }
    }
}

/// Extraction cost policy; conservative suppresses vision OCR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPolicy {
    CostConservative,
    AccuracyFirst,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self::CostConservative
    }
}

impl MailgraphConfig {
    /// Validates configuration is usable
    pub fn validate(&self) -> Result<(), MailgraphError> {
        if self.database_url.is_empty() {
            return Err(MailgraphError::Config("database_url not set".to_string()));
        }

        if self.storage_root.as_os_str().is_empty() {
            return Err(MailgraphError::Config("storage_root not set".to_string()));
        }

        if self.sync.window_months == 0 {
            return Err(MailgraphError::Config(
                "window_months must be >= 1".to_string(),
            ));
        }

        if self.worker.worker_concurrency == 0 {
            return Err(MailgraphError::Config(
                "worker_concurrency must be >= 1".to_string(),
            ));
        }

        if self.worker.soft_time_limit_s >= self.worker.hard_time_limit_s {
            return Err(MailgraphError::Config(
                "soft_time_limit_s must be below hard_time_limit_s".to_string(),
            ));
        }

        if self.worker.queue_low_water_mark >= self.worker.queue_high_water_mark {
            return Err(MailgraphError::Config(
                "queue_low_water_mark must be below queue_high_water_mark".to_string(),
            ));
        }

        let key = hex::decode(&self.credential_key)
            .map_err(|e| MailgraphError::Config(format!("credential_key is not hex: {}", e)))?;
        if key.len() != 32 {
            return Err(MailgraphError::Config(format!(
                "credential_key must be 32 bytes, got {}",
                key.len()
            )));
        }

        Ok(())
    }

    /// Loads configuration from environment variables with defaults
    pub fn from_env() -> Result<Self, MailgraphError> {
        let config = Self {
            database_url: env_or("MAILGRAPH_DATABASE_URL", "sqlite://mailgraph.db"),
            storage_root: PathBuf::from(env_or("MAILGRAPH_STORAGE_ROOT", "./storage")),
            sync: SyncConfig {
                window_months: env_parse("MAILGRAPH_WINDOW_MONTHS", DEFAULT_WINDOW_MONTHS),
                max_emails_per_sync: env_parse("MAILGRAPH_MAX_EMAILS_PER_SYNC", 0),
                overlap_window_hours: env_parse(
                    "MAILGRAPH_OVERLAP_WINDOW_HOURS",
                    DEFAULT_OVERLAP_WINDOW_HOURS,
                ),
            },
            worker: WorkerConfig {
                worker_concurrency: env_parse(
                    "MAILGRAPH_WORKER_CONCURRENCY",
                    DEFAULT_WORKER_CONCURRENCY,
                ),
                soft_time_limit_s: env_parse(
                    "MAILGRAPH_SOFT_TIME_LIMIT_S",
                    DEFAULT_SOFT_TIME_LIMIT_SECONDS,
                ),
                hard_time_limit_s: env_parse(
                    "MAILGRAPH_HARD_TIME_LIMIT_S",
                    DEFAULT_HARD_TIME_LIMIT_SECONDS,
                ),
                queue_high_water_mark: env_parse(
                    "MAILGRAPH_QUEUE_HIGH_WATER_MARK",
                    QUEUE_HIGH_WATER_MARK,
                ),
                queue_low_water_mark: env_parse(
                    "MAILGRAPH_QUEUE_LOW_WATER_MARK",
                    QUEUE_LOW_WATER_MARK,
                ),
                lane_caps: parse_lane_caps(&env_or("MAILGRAPH_LANE_CAPS", "")),
            },
            llm: LlmConfig {
                base_url: env_or("MAILGRAPH_LLM_BASE_URL", "http://localhost:11434/v1"),
                model: env_or("MAILGRAPH_LLM_MODEL", "qwen2.5:14b"),
                api_key: std::env::var("MAILGRAPH_LLM_API_KEY").ok(),
                llm_per_user_rpm: env_parse("MAILGRAPH_LLM_PER_USER_RPM", 10),
                llm_global_rpm: env_parse("MAILGRAPH_LLM_GLOBAL_RPM", 60),
                llm_daily_user_dollar_cap: env_parse("MAILGRAPH_LLM_DAILY_USER_DOLLAR_CAP", 5.0),
                llm_per_document_dollar_cap: env_parse(
                    "MAILGRAPH_LLM_PER_DOCUMENT_DOLLAR_CAP",
                    0.25,
                ),
                prompt_price_per_1k: env_parse("MAILGRAPH_LLM_PROMPT_PRICE_PER_1K", 0.00025),
                completion_price_per_1k: env_parse(
                    "MAILGRAPH_LLM_COMPLETION_PRICE_PER_1K",
                    0.00125,
                ),
            },
            oauth: OAuthConfig {
                public_protocol: env_or("PUBLIC_PROTOCOL", "https"),
                public_domain: env_or("PUBLIC_DOMAIN", "localhost"),
                gmail_client_id: env_or("GMAIL_CLIENT_ID", ""),
                gmail_client_secret: env_or("GMAIL_CLIENT_SECRET", ""),
                outlook_client_id: env_or("OUTLOOK_CLIENT_ID", ""),
                outlook_client_secret: env_or("OUTLOOK_CLIENT_SECRET", ""),
                outlook_tenant: env_or("OUTLOOK_TENANT", "common"),
            },
            cost_policy: match env_or("MAILGRAPH_COST_POLICY", "cost_conservative").as_str() {
                "accuracy_first" => CostPolicy::AccuracyFirst,
                _ => CostPolicy::CostConservative,
            },
            template_ttl_days: env_parse("MAILGRAPH_TEMPLATE_TTL_DAYS", DEFAULT_TEMPLATE_TTL_DAYS),
            rate_limit_burst: env_parse("MAILGRAPH_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST),
            credential_key: env_or("MAILGRAPH_CREDENTIAL_KEY", ""),
        };

        config.validate()?;
        Ok(config)
    }

    /// A config suitable for tests: in-memory database, temp-style storage
    pub fn for_tests(storage_root: PathBuf) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            storage_root,
            sync: SyncConfig::default(),
            worker: WorkerConfig::default(),
            llm: LlmConfig::default(),
            oauth: OAuthConfig::default(),
            cost_policy: CostPolicy::default(),
            template_ttl_days: DEFAULT_TEMPLATE_TTL_DAYS,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            credential_key: "00".repeat(32),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// `attachments=2,documents=1` → per-lane running caps
fn parse_lane_caps(raw: &str) -> std::collections::HashMap<String, u64> {
    raw.split(',')
        .filter_map(|pair| {
            let (lane, cap) = pair.split_once('=')?;
            Some((lane.trim().to_string(), cap.trim().parse().ok()?))
        })
        .collect()
}

fn default_window_months() -> u32 {
    DEFAULT_WINDOW_MONTHS
}
fn default_overlap_window_hours() -> u32 {
    DEFAULT_OVERLAP_WINDOW_HOURS
}
fn default_worker_concurrency() -> usize {
    DEFAULT_WORKER_CONCURRENCY
}
fn default_soft_time_limit_s() -> u64 {
    DEFAULT_SOFT_TIME_LIMIT_SECONDS
}
fn default_hard_time_limit_s() -> u64 {
    DEFAULT_HARD_TIME_LIMIT_SECONDS
}
fn default_queue_high_water_mark() -> u64 {
    QUEUE_HIGH_WATER_MARK
}
fn default_queue_low_water_mark() -> u64 {
    QUEUE_LOW_WATER_MARK
}
fn default_template_ttl_days() -> u32 {
    DEFAULT_TEMPLATE_TTL_DAYS
}
fn default_rate_limit_burst() -> f64 {
    DEFAULT_RATE_LIMIT_BURST
}
fn default_llm_per_user_rpm() -> u32 {
    10
}
fn default_llm_global_rpm() -> u32 {
    60
}
fn default_llm_daily_user_dollar_cap() -> f64 {
    5.0
}
fn default_llm_per_document_dollar_cap() -> f64 {
    0.25
}
fn default_prompt_price() -> f64 {
    0.00025
}
fn default_completion_price() -> f64 {
    0.00125
}
fn default_outlook_tenant() -> String {
    "common".to_string()
}
