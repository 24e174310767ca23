//! Two-stage intent classifier.
//!
//! Stage 1 is a cheap normalized keyword match — no external call.
//! Stage 2, reached only on a keyword miss for a long-enough message,
//! asks the LLM a closed yes/no question and parses a strict token.
//! Any failure or timeout in stage 2 defaults to **not matched**: the
//! query falls through to generic handling rather than entering the
//! workflow on a guess.

use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use super::config::WorkflowConfig;
use super::message::{ChatMessage, recent_history};
use super::prompt::build_classifier_prompt;
use super::provider::LlmProvider;
use super::traits::Agent;

/// Keywords shorter than this only match whole words; longer keywords
/// also match as substrings (so "sprint" catches "sprints" without
/// "task" catching "multitasking").
const MIN_SUBSTRING_KEYWORD_LEN: usize = 5;

/// Conversation messages included as context in the fallback prompt.
const HISTORY_TAIL: usize = 4;

/// Routes queries into the workflow or leaves them to generic handling.
pub struct IntentClassifier {
    keywords: Vec<String>,
    min_classify_len: usize,
    classify_timeout: std::time::Duration,
    agent: ClassifierAgent,
}

impl IntentClassifier {
    /// Creates a classifier from configuration and the fallback system
    /// prompt. Keywords are normalized once at construction.
    #[must_use]
    pub fn new(config: &WorkflowConfig, system_prompt: String) -> Self {
        Self {
            keywords: config
                .intent_keywords
                .iter()
                .map(|k| normalize(k))
                .filter(|k| !k.is_empty())
                .collect(),
            min_classify_len: config.min_classify_len,
            classify_timeout: config.classify_timeout,
            agent: ClassifierAgent {
                model: config.classifier_model.clone(),
                max_tokens: config.classifier_max_tokens,
                system_prompt,
            },
        }
    }

    /// Stage 1: normalized keyword match. No external call.
    #[must_use]
    pub fn keyword_match(&self, message: &str) -> bool {
        let normalized = normalize(message);
        let words: Vec<&str> = normalized.unicode_words().collect();

        self.keywords.iter().any(|keyword| {
            if keyword.chars().count() >= MIN_SUBSTRING_KEYWORD_LEN || keyword.contains(' ') {
                normalized.contains(keyword.as_str())
            } else {
                words.iter().any(|w| w == keyword)
            }
        })
    }

    /// Full two-stage routing decision.
    ///
    /// Returns `true` when the message should enter the workflow.
    /// Stage 2 failures and timeouts default to `false`.
    pub async fn classify(
        &self,
        provider: &dyn LlmProvider,
        message: &str,
        history: &[ChatMessage],
    ) -> bool {
        if self.keyword_match(message) {
            debug!("intent matched by keyword; no classification call issued");
            return true;
        }

        if message.trim().chars().count() <= self.min_classify_len {
            debug!("message below classification length; not matched");
            return false;
        }

        let tail = format_history_tail(history);
        let user_msg = build_classifier_prompt(message, &tail);

        match tokio::time::timeout(
            self.classify_timeout,
            self.agent.execute(provider, &user_msg),
        )
        .await
        {
            Ok(Ok(response)) => match parse_decision(&response.content) {
                Some(decision) => {
                    debug!(decision, "LLM classification decision");
                    decision
                }
                None => {
                    warn!(
                        content = response.content,
                        "unparseable classification response; defaulting to no match"
                    );
                    false
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "classification call failed; defaulting to no match");
                false
            }
            Err(_) => {
                warn!("classification call timed out; defaulting to no match");
                false
            }
        }
    }
}

impl std::fmt::Debug for IntentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentClassifier")
            .field("keywords", &self.keywords.len())
            .field("min_classify_len", &self.min_classify_len)
            .field("model", &self.agent.model)
            .finish()
    }
}

/// The LLM stage behind the classifier.
struct ClassifierAgent {
    model: String,
    max_tokens: u32,
    system_prompt: String,
}

impl Agent for ClassifierAgent {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

/// Parses a strict YES/NO token from the model response.
///
/// Takes the first alphabetic run; anything other than YES or NO is
/// `None` so the caller can fail safe.
fn parse_decision(content: &str) -> Option<bool> {
    let token: String = content
        .trim()
        .chars()
        .skip_while(|c| !c.is_alphabetic())
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_uppercase();
    match token.as_str() {
        "YES" => Some(true),
        "NO" => Some(false),
        _ => None,
    }
}

/// Lowercases and folds common Latin diacritics so "tâches" matches a
/// "taches" keyword regardless of accents.
fn normalize(text: &str) -> String {
    text.to_lowercase().chars().map(fold_diacritic).collect()
}

const fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' => 'u',
        'ç' | 'ć' | 'č' => 'c',
        'ñ' | 'ń' | 'ň' => 'n',
        'š' | 'ś' => 's',
        'ž' | 'ź' | 'ż' => 'z',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

fn format_history_tail(history: &[ChatMessage]) -> String {
    recent_history(history, HISTORY_TAIL)
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::workflow::message::{ChatRequest, ChatResponse, TokenUsage, user_message};
    use crate::workflow::prompt::CLASSIFIER_SYSTEM_PROMPT;

    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::Stream;

    /// Mock provider returning a fixed classification answer, counting
    /// how many calls it received.
    struct MockClassifierProvider {
        answer: &'static str,
        fail: bool,
        delay: Duration,
        call_count: AtomicUsize,
    }

    impl MockClassifierProvider {
        fn answering(answer: &'static str) -> Self {
            Self {
                answer,
                fail: false,
                delay: Duration::ZERO,
                call_count: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                answer: "",
                fail: true,
                delay: Duration::ZERO,
                call_count: AtomicUsize::new(0),
            }
        }

        fn slow(answer: &'static str, delay: Duration) -> Self {
            Self {
                answer,
                fail: false,
                delay,
                call_count: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for MockClassifierProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, WorkflowError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(WorkflowError::ApiRequest {
                    message: "upstream down".to_string(),
                    status: Some(503),
                });
            }
            Ok(ChatResponse {
                content: self.answer.to_string(),
                usage: TokenUsage::default(),
                tool_calls: Vec::new(),
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn chat_stream(
            &self,
            _request: &ChatRequest,
        ) -> Result<
            Pin<Box<dyn Stream<Item = Result<String, WorkflowError>> + Send>>,
            WorkflowError,
        > {
            Err(WorkflowError::Stream {
                message: "not implemented".to_string(),
            })
        }
    }

    fn classifier() -> IntentClassifier {
        let config = WorkflowConfig::builder()
            .api_key("test")
            .classify_timeout(Duration::from_millis(100))
            .build()
            .unwrap_or_else(|_| unreachable!());
        IntentClassifier::new(&config, CLASSIFIER_SYSTEM_PROMPT.to_string())
    }

    #[tokio::test]
    async fn test_keyword_hit_skips_llm() {
        let provider = MockClassifierProvider::answering("NO");
        let routed = classifier().classify(&provider, "list sprints", &[]).await;
        assert!(routed);
        assert_eq!(provider.calls(), 0, "keyword hit must not call the LLM");
    }

    #[tokio::test]
    async fn test_keyword_miss_llm_yes() {
        let provider = MockClassifierProvider::answering("YES");
        let routed = classifier()
            .classify(&provider, "¿qué hay pendiente para el equipo?", &[])
            .await;
        assert!(routed);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_keyword_miss_llm_no() {
        let provider = MockClassifierProvider::answering("No.");
        let routed = classifier()
            .classify(&provider, "what's the weather like today", &[])
            .await;
        assert!(!routed);
    }

    #[tokio::test]
    async fn test_llm_failure_fails_safe() {
        let provider = MockClassifierProvider::failing();
        let routed = classifier()
            .classify(&provider, "how are things progressing lately", &[])
            .await;
        assert!(!routed);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_timeout_fails_safe() {
        let provider = MockClassifierProvider::slow("YES", Duration::from_secs(60));
        let routed = classifier()
            .classify(&provider, "how are things progressing lately", &[])
            .await;
        assert!(!routed);
    }

    #[tokio::test]
    async fn test_short_message_skips_llm() {
        let provider = MockClassifierProvider::answering("YES");
        let routed = classifier().classify(&provider, "hola", &[]).await;
        assert!(!routed);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_response_fails_safe() {
        let provider = MockClassifierProvider::answering("maybe, hard to say");
        let routed = classifier()
            .classify(&provider, "how are things progressing lately", &[])
            .await;
        assert!(!routed);
    }

    #[tokio::test]
    async fn test_history_included_in_fallback() {
        let provider = MockClassifierProvider::answering("YES");
        let history = vec![user_message("we talked about the roadmap")];
        let routed = classifier()
            .classify(&provider, "and what about next week?", &history)
            .await;
        assert!(routed);
    }

    #[test]
    fn test_keyword_match_diacritic_fold() {
        let config = WorkflowConfig::builder()
            .api_key("test")
            .intent_keywords(vec!["taches".to_string()])
            .build()
            .unwrap_or_else(|_| unreachable!());
        let classifier = IntentClassifier::new(&config, String::new());
        assert!(classifier.keyword_match("Liste les tâches ouvertes"));
    }

    #[test]
    fn test_keyword_match_word_boundary_for_short_keywords() {
        let config = WorkflowConfig::builder()
            .api_key("test")
            .intent_keywords(vec!["task".to_string(), "sprint".to_string()])
            .build()
            .unwrap_or_else(|_| unreachable!());
        let classifier = IntentClassifier::new(&config, String::new());
        // short keyword: whole-word only
        assert!(classifier.keyword_match("close the task now"));
        assert!(!classifier.keyword_match("I enjoy multitasking"));
        // long keyword: substring allowed
        assert!(classifier.keyword_match("show all sprints"));
    }

    #[test]
    fn test_parse_decision_strict() {
        assert_eq!(parse_decision("YES"), Some(true));
        assert_eq!(parse_decision("  yes\n"), Some(true));
        assert_eq!(parse_decision("No."), Some(false));
        assert_eq!(parse_decision("definitely"), None);
        assert_eq!(parse_decision(""), None);
    }
}
