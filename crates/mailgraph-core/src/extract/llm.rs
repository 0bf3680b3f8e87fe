//! LLM client and call governor.
//!
//! Every LLM call in the system goes through the governor: per-user and
//! global per-minute caps, per-user daily and per-document dollar caps, and
//! a circuit breaker that opens after consecutive failures. Components never
//! talk to the model endpoint directly.

use crate::constants::{
    LLM_BREAKER_COOLOFF_SECONDS, LLM_BREAKER_FAILURE_THRESHOLD, LLM_BREAKER_WINDOW_SECONDS,
    LLM_MAX_REFORMAT_ATTEMPTS, LLM_TIMEOUT_SECONDS,
};
use crate::error::MailgraphError;
use crate::models::LlmConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f64,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, MailgraphError>;
}

#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<ApiChatChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChatChoice {
    message: ApiChatMessage,
}

#[derive(Debug, Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI-compatible chat-completions client
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECONDS))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, MailgraphError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ApiChatRequest {
            model: self.model.clone(),
            messages: vec![
                ApiChatMessage {
                    role: "system".to_string(),
                    content: request.system,
                },
                ApiChatMessage {
                    role: "user".to_string(),
                    content: request.user,
                },
            ],
            temperature: request.temperature,
        };

        let mut builder = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| MailgraphError::LlmTransient(format!("llm request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(MailgraphError::LlmTransient(format!("llm {}", status)));
            }
            return Err(MailgraphError::LlmPermanent(format!("llm {}", status)));
        }

        let parsed: ApiChatResponse = response
            .json()
            .await
            .map_err(|e| MailgraphError::LlmTransient(format!("llm body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| MailgraphError::LlmPermanent("llm returned no choices".to_string()))?;

        let usage = parsed.usage.unwrap_or_default();
        Ok(ChatOutcome {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

struct MinuteWindow {
    minute: i64,
    count: u32,
}

struct GovernorState {
    per_user_minute: HashMap<String, MinuteWindow>,
    global_minute: MinuteWindow,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    breaker_open_until: Option<Instant>,
    /// (user_id, yyyy-mm-dd) -> dollars; advisory, in-memory
    daily_spend: HashMap<(String, String), f64>,
    document_spend: HashMap<String, f64>,
}

/// Call governor wrapping an [`LlmClient`]
pub struct LlmGovernor {
    client: std::sync::Arc<dyn LlmClient>,
    config: LlmConfig,
    state: Mutex<GovernorState>,
}

impl LlmGovernor {
    pub fn new(client: std::sync::Arc<dyn LlmClient>, config: LlmConfig) -> Self {
        Self {
            client,
            config,
            state: Mutex::new(GovernorState {
                per_user_minute: HashMap::new(),
                global_minute: MinuteWindow { minute: 0, count: 0 },
                consecutive_failures: 0,
                window_start: None,
                breaker_open_until: None,
                daily_spend: HashMap::new(),
                document_spend: HashMap::new(),
            }),
        }
    }

    /// Admission control; returns an error without consuming budget
    fn admit(&self, user_id: &str, document_id: Option<&str>) -> Result<(), MailgraphError> {
        let mut state = self.state.lock().expect("governor lock");
        let now = Instant::now();

        if let Some(open_until) = state.breaker_open_until {
            if now < open_until {
                return Err(MailgraphError::LlmTransient(
                    "llm circuit breaker open".to_string(),
                ));
            }
            state.breaker_open_until = None;
            state.consecutive_failures = 0;
        }

        let minute = chrono::Utc::now().timestamp() / 60;

        if state.global_minute.minute == minute
            && state.global_minute.count >= self.config.llm_global_rpm
        {
            return Err(MailgraphError::rate_limited(
                "global llm rpm cap",
                Some(Duration::from_secs(60)),
            ));
        }

        let user_window = state
            .per_user_minute
            .entry(user_id.to_string())
            .or_insert(MinuteWindow { minute, count: 0 });
        if user_window.minute == minute && user_window.count >= self.config.llm_per_user_rpm {
            return Err(MailgraphError::rate_limited(
                format!("llm rpm cap for user {}", user_id),
                Some(Duration::from_secs(60)),
            ));
        }

        let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let spent = state
            .daily_spend
            .get(&(user_id.to_string(), day))
            .copied()
            .unwrap_or(0.0);
        if spent >= self.config.llm_daily_user_dollar_cap {
            return Err(MailgraphError::CostCapExceeded(format!(
                "user {} spent ${:.4} today (cap ${:.2})",
                user_id, spent, self.config.llm_daily_user_dollar_cap
            )));
        }

        if let Some(doc_id) = document_id {
            let doc_spent = state.document_spend.get(doc_id).copied().unwrap_or(0.0);
            if doc_spent >= self.config.llm_per_document_dollar_cap {
                return Err(MailgraphError::CostCapExceeded(format!(
                    "document {} spent ${:.4} (cap ${:.2})",
                    doc_id, doc_spent, self.config.llm_per_document_dollar_cap
                )));
            }
        }

        // Admitted; count against both windows
        if state.global_minute.minute == minute {
            state.global_minute.count += 1;
        } else {
            state.global_minute = MinuteWindow { minute, count: 1 };
        }
        let user_window = state
            .per_user_minute
            .get_mut(user_id)
            .expect("window inserted above");
        if user_window.minute == minute {
            user_window.count += 1;
        } else {
            *user_window = MinuteWindow { minute, count: 1 };
        }

        Ok(())
    }

    fn record_success(&self, user_id: &str, document_id: Option<&str>, outcome: &ChatOutcome) {
        let cost = outcome.prompt_tokens as f64 / 1000.0 * self.config.prompt_price_per_1k
            + outcome.completion_tokens as f64 / 1000.0 * self.config.completion_price_per_1k;

        let mut state = self.state.lock().expect("governor lock");
        state.consecutive_failures = 0;
        state.window_start = None;

        let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
        *state
            .daily_spend
            .entry((user_id.to_string(), day))
            .or_insert(0.0) += cost;
        if let Some(doc_id) = document_id {
            *state
                .document_spend
                .entry(doc_id.to_string())
                .or_insert(0.0) += cost;
        }

        debug!(user_id = %user_id, cost = cost, "LLM call accounted");
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().expect("governor lock");
        let now = Instant::now();

        // Failures only count as consecutive within the window
        match state.window_start {
            Some(start) if now.duration_since(start).as_secs() <= LLM_BREAKER_WINDOW_SECONDS => {
                state.consecutive_failures += 1;
            }
            _ => {
                state.window_start = Some(now);
                state.consecutive_failures = 1;
            }
        }

        if state.consecutive_failures >= LLM_BREAKER_FAILURE_THRESHOLD {
            warn!(
                failures = state.consecutive_failures,
                cooloff_s = LLM_BREAKER_COOLOFF_SECONDS,
                "LLM circuit breaker opened"
            );
            state.breaker_open_until =
                Some(now + Duration::from_secs(LLM_BREAKER_COOLOFF_SECONDS));
        }
    }

    /// Runs a chat call and parses the response as a JSON object, retrying
    /// with a reformat instruction when the model wraps or mangles the JSON
    pub async fn complete_json(
        &self,
        user_id: &str,
        document_id: Option<&str>,
        system: &str,
        user: &str,
    ) -> Result<serde_json::Value, MailgraphError> {
        self.admit(user_id, document_id)?;

        let mut request = ChatRequest {
            system: system.to_string(),
            user: user.to_string(),
            temperature: 0.0,
        };

        let mut attempt = 0;
        loop {
            let outcome = match self.client.chat(request.clone()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if matches!(e, MailgraphError::LlmTransient(_)) {
                        self.record_failure();
                    }
                    return Err(e);
                }
            };

            self.record_success(user_id, document_id, &outcome);

            match parse_json_content(&outcome.content) {
                Ok(value) => return Ok(value),
                Err(parse_err) => {
                    if attempt >= LLM_MAX_REFORMAT_ATTEMPTS {
                        return Err(MailgraphError::LlmPermanent(format!(
                            "malformed response after {} reformat attempts: {}",
                            attempt, parse_err
                        )));
                    }
                    attempt += 1;
                    warn!(attempt = attempt, "LLM response was not JSON, asking for reformat");
                    self.admit(user_id, document_id)?;
                    request.user = format!(
                        "Your previous reply was not valid JSON ({}). \
                         Reply again with ONLY the JSON object.\n\nPrevious reply:\n{}",
                        parse_err, outcome.content
                    );
                }
            }
        }
    }
}

/// Tolerates markdown fences and stray prose around the object
fn parse_json_content(content: &str) -> Result<serde_json::Value, String> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
        return Err("top-level value is not an object".to_string());
    }

    let start = trimmed.find('{').ok_or("no JSON object found")?;
    let end = trimmed.rfind('}').ok_or("no closing brace found")?;
    if end <= start {
        return Err("malformed braces".to_string());
    }

    serde_json::from_str(&trimmed[start..=end]).map_err(|e| e.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted client: pops canned results, or fails when the script runs dry
    pub struct ScriptedLlm {
        pub responses: Mutex<VecDeque<Result<String, MailgraphError>>>,
        pub calls: std::sync::atomic::AtomicU32,
    }

    impl ScriptedLlm {
        pub fn new(responses: Vec<Result<String, MailgraphError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: std::sync::atomic::AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatOutcome, MailgraphError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Err(MailgraphError::LlmTransient("script dry".to_string())));
            next.map(|content| ChatOutcome {
                content,
                prompt_tokens: 100,
                completion_tokens: 50,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedLlm;
    use super::*;
    use std::sync::Arc;

    fn governor_with(responses: Vec<Result<String, MailgraphError>>, config: LlmConfig) -> (LlmGovernor, Arc<ScriptedLlm>) {
        let client = Arc::new(ScriptedLlm::new(responses));
        (LlmGovernor::new(client.clone(), config), client)
    }

    #[tokio::test]
    async fn test_complete_json_happy_path() {
        let (governor, _) = governor_with(
            vec![Ok(r#"{"qualified": true, "confidence": 0.8, "reason": "invoice"}"#.to_string())],
            LlmConfig::default(),
        );

        let value = governor
            .complete_json("user-1", None, "system", "user")
            .await
            .unwrap();
        assert_eq!(value["qualified"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_markdown_fenced_json_is_parsed() {
        let (governor, _) = governor_with(
            vec![Ok("```json\n{\"a\": 1}\n```".to_string())],
            LlmConfig::default(),
        );
        let value = governor
            .complete_json("user-1", None, "s", "u")
            .await
            .unwrap();
        assert_eq!(value["a"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_reformat_retry_then_permanent() {
        let (governor, client) = governor_with(
            vec![
                Ok("not json at all".to_string()),
                Ok("still not json".to_string()),
                Ok("nope".to_string()),
            ],
            LlmConfig::default(),
        );

        let err = governor
            .complete_json("user-1", None, "s", "u")
            .await
            .unwrap_err();
        assert!(matches!(err, MailgraphError::LlmPermanent(_)));
        assert_eq!(client.call_count(), 1 + LLM_MAX_REFORMAT_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_consecutive_failures() {
        let failures: Vec<Result<String, MailgraphError>> = (0..5)
            .map(|i| Err(MailgraphError::LlmTransient(format!("boom {}", i))))
            .collect();
        let (governor, client) = governor_with(failures, LlmConfig::default());

        for _ in 0..5 {
            let err = governor
                .complete_json("user-1", None, "s", "u")
                .await
                .unwrap_err();
            assert!(err.is_retriable());
        }
        assert_eq!(client.call_count(), 5);

        // Breaker now open: admission fails without touching the client
        let err = governor
            .complete_json("user-1", None, "s", "u")
            .await
            .unwrap_err();
        assert!(matches!(err, MailgraphError::LlmTransient(_)));
        assert!(err.to_string().contains("circuit breaker"));
        assert_eq!(client.call_count(), 5);
    }

    #[tokio::test]
    async fn test_per_user_rpm_cap() {
        let responses = (0..3)
            .map(|_| Ok("{\"ok\": true}".to_string()))
            .collect();
        let config = LlmConfig {
            llm_per_user_rpm: 2,
            ..Default::default()
        };
        let (governor, _) = governor_with(responses, config);

        governor.complete_json("user-1", None, "s", "u").await.unwrap();
        governor.complete_json("user-1", None, "s", "u").await.unwrap();

        let err = governor
            .complete_json("user-1", None, "s", "u")
            .await
            .unwrap_err();
        assert!(matches!(err, MailgraphError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_daily_dollar_cap_is_terminal() {
        let responses = (0..2)
            .map(|_| Ok("{\"ok\": true}".to_string()))
            .collect();
        let config = LlmConfig {
            // First call costs 100/1000*1.0 + 50/1000*1.0 = 0.15; cap below that
            prompt_price_per_1k: 1.0,
            completion_price_per_1k: 1.0,
            llm_daily_user_dollar_cap: 0.10,
            ..Default::default()
        };
        let (governor, _) = governor_with(responses, config);

        governor.complete_json("user-1", None, "s", "u").await.unwrap();
        let err = governor
            .complete_json("user-1", None, "s", "u")
            .await
            .unwrap_err();
        assert!(matches!(err, MailgraphError::CostCapExceeded(_)));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_per_document_dollar_cap() {
        let responses = (0..2)
            .map(|_| Ok("{\"ok\": true}".to_string()))
            .collect();
        let config = LlmConfig {
            prompt_price_per_1k: 1.0,
            completion_price_per_1k: 1.0,
            llm_per_document_dollar_cap: 0.10,
            llm_daily_user_dollar_cap: 100.0,
            ..Default::default()
        };
        let (governor, _) = governor_with(responses, config);

        governor
            .complete_json("user-1", Some("doc-1"), "s", "u")
            .await
            .unwrap();
        let err = governor
            .complete_json("user-1", Some("doc-1"), "s", "u")
            .await
            .unwrap_err();
        assert!(matches!(err, MailgraphError::CostCapExceeded(_)));

        // A different document is unaffected
        assert!(governor
            .complete_json("user-1", Some("doc-2"), "s", "u")
            .await
            .is_err_and(|e| matches!(e, MailgraphError::LlmTransient(_))));
    }
}
