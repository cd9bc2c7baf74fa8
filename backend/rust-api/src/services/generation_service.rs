use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::metrics::GENERATION_REQUESTS_TOTAL;
use crate::models::quiz::GenerateQuizRequest;
use crate::models::Question;

const SYSTEM_PROMPT: &str = "You are an expert quiz generator. Return valid JSON only.";
const MAX_TOKENS_PER_QUESTION: u32 = 350;
const MAX_TOKENS_CAP: u32 = 8000;

/// Chain order when the configured provider is `auto` (or failed over).
const PROVIDER_PRIORITY: [Provider; 4] = [
    Provider::Ollama,
    Provider::Groq,
    Provider::Gemini,
    Provider::OpenAi,
];

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```(?:json)?").expect("valid fence regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    Groq,
    Gemini,
    OpenAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::Groq => "groq",
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }

    fn from_name(name: &str) -> Option<Provider> {
        match name {
            "ollama" => Some(Provider::Ollama),
            "groq" => Some(Provider::Groq),
            "gemini" => Some(Provider::Gemini),
            "openai" => Some(Provider::OpenAi),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{provider} returned an empty completion")]
    EmptyCompletion { provider: &'static str },
    #[error("model output is not a question array: {0}")]
    Parse(String),
    #[error("generated question rejected: {0}")]
    InvalidQuestion(String),
    #[error("no generation provider succeeded (tried: {tried})")]
    NoProvider { tried: String },
}

/// Question generation over a chain of LLM providers. Each provider is one
/// HTTP call with the configured timeout; the first one that returns a
/// completion wins and its output is parsed into validated questions.
pub struct GenerationService {
    client: Client,
    config: GenerationConfig,
}

impl GenerationService {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Walk the provider chain until one returns a completion, then parse it.
    /// Providers without credentials are skipped. Parse failures are terminal
    /// since the winning provider already spent its completion.
    pub async fn generate(
        &self,
        request: &GenerateQuizRequest,
    ) -> Result<Vec<Question>, GenerationError> {
        let prompt = build_prompt(request);
        let max_tokens = (request.num_questions * MAX_TOKENS_PER_QUESTION).min(MAX_TOKENS_CAP);

        let mut tried: Vec<&'static str> = Vec::new();

        for provider in self.provider_order() {
            if !self.has_credentials(provider) {
                tracing::debug!("Skipping {}: no API key configured", provider.as_str());
                continue;
            }
            tried.push(provider.as_str());

            match self.complete(provider, &prompt, max_tokens).await {
                Ok(raw) => {
                    GENERATION_REQUESTS_TOTAL
                        .with_label_values(&[provider.as_str(), "success"])
                        .inc();
                    tracing::info!("Generation succeeded via {}", provider.as_str());

                    let questions = parse_questions(&raw)?;
                    if questions.len() != request.num_questions as usize {
                        tracing::debug!(
                            "Model returned {} questions, {} requested",
                            questions.len(),
                            request.num_questions
                        );
                    }
                    return Ok(questions);
                }
                Err(e) => {
                    GENERATION_REQUESTS_TOTAL
                        .with_label_values(&[provider.as_str(), "error"])
                        .inc();
                    tracing::warn!("{} generation failed: {}", provider.as_str(), e);
                }
            }
        }

        let tried = if tried.is_empty() {
            "none".to_string()
        } else {
            tried.join(", ")
        };
        Err(GenerationError::NoProvider { tried })
    }

    /// Explicitly configured provider first, the rest of the chain behind it.
    fn provider_order(&self) -> Vec<Provider> {
        let configured = self.config.provider.to_ascii_lowercase();
        if configured == "auto" {
            return PROVIDER_PRIORITY.to_vec();
        }

        match Provider::from_name(&configured) {
            Some(first) => {
                let mut order = vec![first];
                order.extend(PROVIDER_PRIORITY.iter().copied().filter(|p| *p != first));
                order
            }
            None => {
                tracing::warn!(
                    "Unknown LLM provider '{}', using auto order",
                    self.config.provider
                );
                PROVIDER_PRIORITY.to_vec()
            }
        }
    }

    fn has_credentials(&self, provider: Provider) -> bool {
        match provider {
            // Local model, no key involved.
            Provider::Ollama => true,
            Provider::Groq => self.config.groq_api_key.is_some(),
            Provider::Gemini => self.config.gemini_api_key.is_some(),
            Provider::OpenAi => self.config.openai_api_key.is_some(),
        }
    }

    async fn complete(
        &self,
        provider: Provider,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        match provider {
            Provider::Ollama => self.complete_ollama(prompt).await,
            Provider::Groq => {
                let key = self.config.groq_api_key.as_deref().unwrap_or_default();
                self.complete_chat(
                    provider,
                    "https://api.groq.com/openai/v1/chat/completions",
                    key,
                    &self.config.groq_model,
                    prompt,
                    max_tokens,
                )
                .await
            }
            Provider::OpenAi => {
                let key = self.config.openai_api_key.as_deref().unwrap_or_default();
                self.complete_chat(
                    provider,
                    "https://api.openai.com/v1/chat/completions",
                    key,
                    &self.config.openai_model,
                    prompt,
                    max_tokens,
                )
                .await
            }
            Provider::Gemini => self.complete_gemini(prompt).await,
        }
    }

    async fn complete_ollama(&self, prompt: &str) -> Result<String, GenerationError> {
        let provider = Provider::Ollama.as_str();
        let url = format!("{}/api/generate", self.config.ollama_url);
        let body = json!({
            "model": self.config.ollama_model,
            "prompt": format!("System: {}\nUser: {}", SYSTEM_PROMPT, prompt),
            "stream": false,
            "format": "json",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|source| GenerationError::Http { provider, source })?;

        let response = check_status(provider, response).await?;

        #[derive(Deserialize)]
        struct OllamaResponse {
            #[serde(default)]
            response: String,
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|source| GenerationError::Http { provider, source })?;

        non_empty(provider, parsed.response)
    }

    /// OpenAI-compatible chat completions endpoint; Groq speaks the same
    /// protocol.
    async fn complete_chat(
        &self,
        provider: Provider,
        url: &str,
        api_key: &str,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        let provider = provider.as_str();
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.7,
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|source| GenerationError::Http { provider, source })?;

        let response = check_status(provider, response).await?;

        #[derive(Deserialize)]
        struct ChatResponse {
            #[serde(default)]
            choices: Vec<ChatChoice>,
        }
        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChatMessage,
        }
        #[derive(Deserialize)]
        struct ChatMessage {
            #[serde(default)]
            content: String,
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|source| GenerationError::Http { provider, source })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        non_empty(provider, content)
    }

    async fn complete_gemini(&self, prompt: &str) -> Result<String, GenerationError> {
        let provider = Provider::Gemini.as_str();
        let key = self.config.gemini_api_key.as_deref().unwrap_or_default();
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.config.gemini_model, key
        );
        let body = json!({
            "contents": [{
                "parts": [{"text": format!("{}\n\n{}", SYSTEM_PROMPT, prompt)}]
            }]
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|source| GenerationError::Http { provider, source })?;

        let response = check_status(provider, response).await?;

        #[derive(Deserialize)]
        struct GeminiResponse {
            #[serde(default)]
            candidates: Vec<GeminiCandidate>,
        }
        #[derive(Deserialize)]
        struct GeminiCandidate {
            #[serde(default)]
            content: GeminiContent,
        }
        #[derive(Deserialize, Default)]
        struct GeminiContent {
            #[serde(default)]
            parts: Vec<GeminiPart>,
        }
        #[derive(Deserialize)]
        struct GeminiPart {
            #[serde(default)]
            text: String,
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|source| GenerationError::Http { provider, source })?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        non_empty(provider, text)
    }
}

async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(GenerationError::Status {
        provider,
        status,
        body,
    })
}

fn non_empty(provider: &'static str, text: String) -> Result<String, GenerationError> {
    if text.trim().is_empty() {
        Err(GenerationError::EmptyCompletion { provider })
    } else {
        Ok(text)
    }
}

fn build_prompt(request: &GenerateQuizRequest) -> String {
    // Seed line nudges the model away from repeating earlier completions.
    let seed: u32 = rand::rng().random_range(1..=100_000);
    let difficulty = request.difficulty.as_str();

    format!(
        "Generate {count} UNIQUE, DIVERSE, and NON-REPETITIVE multiple-choice questions \
         for a quiz about '{subject}' (Category: {category}).\n\
         Difficulty: {difficulty}\n\
         Random Seed: {seed} (Use this to vary questions from previous requests)\n\n\
         Return ONLY a valid JSON array with this exact structure:\n\
         [\n    {{\n        \"question\": \"Question text here?\",\n        \
         \"options\": [\"Option 1\", \"Option 2\", \"Option 3\", \"Option 4\"],\n        \
         \"correct_answer\": 0,\n        \
         \"explanation\": \"Explanation of the correct answer\"\n    }}\n]\n\n\
         Important:\n\
         - Each question must have exactly 4 options\n\
         - correct_answer must be the index (0-3) of the correct option\n\
         - Make questions relevant to {difficulty} difficulty level\n\
         - Provide clear explanations",
        count = request.num_questions,
        subject = request.subject,
        category = request.category,
        difficulty = difficulty,
        seed = seed,
    )
}

/// What the model is asked to emit, before it becomes a `Question`.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    question: String,
    options: Vec<String>,
    correct_answer: u32,
    #[serde(default)]
    explanation: Option<String>,
}

/// Models wrap JSON in code fences or prose more often than not. Drop the
/// fences, then keep only the outermost `[...]` span.
fn clean_model_output(raw: &str) -> String {
    let text = CODE_FENCE.replace_all(raw, "");
    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text.trim().to_string(),
    }
}

/// Parse and validate the model output, assign ids, shuffle and renumber.
fn parse_questions(raw: &str) -> Result<Vec<Question>, GenerationError> {
    let cleaned = clean_model_output(raw);
    let parsed: Vec<RawQuestion> =
        serde_json::from_str(&cleaned).map_err(|e| GenerationError::Parse(e.to_string()))?;

    if parsed.is_empty() {
        return Err(GenerationError::Parse("model returned an empty array".to_string()));
    }

    let mut questions = Vec::with_capacity(parsed.len());
    for (i, raw_q) in parsed.into_iter().enumerate() {
        if raw_q.question.trim().is_empty() {
            return Err(GenerationError::InvalidQuestion(format!(
                "question {} has empty text",
                i + 1
            )));
        }
        if raw_q.options.len() != 4 {
            return Err(GenerationError::InvalidQuestion(format!(
                "question {} has {} options, expected 4",
                i + 1,
                raw_q.options.len()
            )));
        }
        if raw_q.correct_answer > 3 {
            return Err(GenerationError::InvalidQuestion(format!(
                "question {} has correct_answer {} out of range",
                i + 1,
                raw_q.correct_answer
            )));
        }

        questions.push(Question {
            id: Uuid::new_v4().to_string(),
            text: raw_q.question,
            options: raw_q.options,
            correct_answer: raw_q.correct_answer,
            explanation: raw_q.explanation,
            order: 0,
        });
    }

    questions.shuffle(&mut rand::rng());
    for (i, q) in questions.iter_mut().enumerate() {
        q.order = i as u32 + 1;
    }

    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;

    fn request(num_questions: u32) -> GenerateQuizRequest {
        GenerateQuizRequest {
            title: None,
            category: "Science".to_string(),
            subject: "Physics".to_string(),
            difficulty: Difficulty::Medium,
            num_questions,
            is_temporary: false,
        }
    }

    fn config_with_provider(provider: &str) -> GenerationConfig {
        GenerationConfig {
            provider: provider.to_string(),
            ..GenerationConfig::default()
        }
    }

    const VALID_ARRAY: &str = r#"[
        {"question": "What is 2+2?", "options": ["3", "4", "5", "6"], "correct_answer": 1, "explanation": "Basic addition."},
        {"question": "Boiling point of water at sea level?", "options": ["90C", "95C", "100C", "105C"], "correct_answer": 2}
    ]"#;

    #[test]
    fn clean_output_strips_json_fence() {
        let raw = format!("Here you go:\n```json\n{}\n```\nEnjoy!", VALID_ARRAY);
        let cleaned = clean_model_output(&raw);
        assert!(cleaned.starts_with('['));
        assert!(cleaned.ends_with(']'));
        assert!(!cleaned.contains("```"));
    }

    #[test]
    fn clean_output_extracts_array_from_prose() {
        let raw = "Sure! The questions are [1, 2, 3] as requested.";
        assert_eq!(clean_model_output(raw), "[1, 2, 3]");
    }

    #[test]
    fn clean_output_without_array_returns_trimmed_text() {
        assert_eq!(clean_model_output("  no array here  "), "no array here");
    }

    #[test]
    fn parse_assigns_ids_and_renumbers() {
        let questions = parse_questions(VALID_ARRAY).unwrap();
        assert_eq!(questions.len(), 2);

        let mut orders: Vec<u32> = questions.iter().map(|q| q.order).collect();
        orders.sort_unstable();
        assert_eq!(orders, vec![1, 2]);

        assert_ne!(questions[0].id, questions[1].id);
        assert!(questions.iter().all(|q| q.options.len() == 4));
        assert!(questions
            .iter()
            .any(|q| q.explanation.as_deref() == Some("Basic addition.")));
    }

    #[test]
    fn parse_rejects_wrong_option_count() {
        let raw = r#"[{"question": "Q?", "options": ["a", "b"], "correct_answer": 0}]"#;
        let err = parse_questions(raw).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidQuestion(_)));
        assert!(err.to_string().contains("2 options"));
    }

    #[test]
    fn parse_rejects_out_of_range_answer() {
        let raw = r#"[{"question": "Q?", "options": ["a", "b", "c", "d"], "correct_answer": 4}]"#;
        let err = parse_questions(raw).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidQuestion(_)));
    }

    #[test]
    fn parse_rejects_non_array_output() {
        let err = parse_questions("I could not generate questions.").unwrap_err();
        assert!(matches!(err, GenerationError::Parse(_)));

        let err = parse_questions("[]").unwrap_err();
        assert!(matches!(err, GenerationError::Parse(_)));
    }

    #[test]
    fn auto_order_walks_full_priority_chain() {
        let svc = GenerationService::new(config_with_provider("auto"));
        assert_eq!(svc.provider_order(), PROVIDER_PRIORITY.to_vec());
    }

    #[test]
    fn explicit_provider_moves_to_front() {
        let svc = GenerationService::new(config_with_provider("gemini"));
        let order = svc.provider_order();
        assert_eq!(order[0], Provider::Gemini);
        assert_eq!(order.len(), 4);
        assert_eq!(
            order.iter().filter(|p| **p == Provider::Gemini).count(),
            1
        );
    }

    #[test]
    fn unknown_provider_falls_back_to_auto_order() {
        let svc = GenerationService::new(config_with_provider("yandexgpt"));
        assert_eq!(svc.provider_order(), PROVIDER_PRIORITY.to_vec());
    }

    #[test]
    fn keyless_providers_are_skipped() {
        let svc = GenerationService::new(config_with_provider("auto"));
        assert!(svc.has_credentials(Provider::Ollama));
        assert!(!svc.has_credentials(Provider::Groq));
        assert!(!svc.has_credentials(Provider::Gemini));
        assert!(!svc.has_credentials(Provider::OpenAi));

        let mut config = config_with_provider("auto");
        config.groq_api_key = Some("gsk-test".to_string());
        let svc = GenerationService::new(config);
        assert!(svc.has_credentials(Provider::Groq));
    }

    #[test]
    fn prompt_names_subject_difficulty_and_count() {
        let prompt = build_prompt(&request(7));
        assert!(prompt.contains("Generate 7 UNIQUE"));
        assert!(prompt.contains("'Physics'"));
        assert!(prompt.contains("Category: Science"));
        assert!(prompt.contains("Difficulty: medium"));
        assert!(prompt.contains("exactly 4 options"));
    }
}
