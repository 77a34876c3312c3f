//! AI code review via the OpenAI chat-completions API.
//!
//! The provider must answer with a single JSON object; malformed output
//! degrades to an empty structured result while the raw text is kept for
//! diagnostics.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::models::{AiIssue, AiReviewResult, CodeRequest};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-4o";

const SYSTEM_PROMPT: &str = r#"You are an expert C# .NET senior developer. Your task is to give a COMPLETE review of the submitted C# code.

Assess the code on ALL relevant aspects:
1. Correctness & logic: does the code do what it appears to intend? Are there bugs?
2. Performance & efficiency: unnecessary blocking calls, expensive operations in loops (such as string concatenation), memory problems?
3. Safety & robustness: are inputs validated? Are exceptions handled correctly? Any security risks (such as hardcoded secrets)?
4. Maintainability & best practices: is the code clean? Are SOLID principles followed? Is the naming clear?
5. Style & readability: is the code needlessly complex? Is the style consistent?

After fully analyzing the code, give a final score from 1 (very poor) to 10 (perfect code).

You MUST format your answer as a single, valid JSON object:
{
  "final_score": (int, a number from 1 to 10),
  "general_feedback": (string, a general summary of the code quality, strengths and weaknesses),
  "issues": [
    {
      "line_start": (int),
      "line_end": (int),
      "severity": "Info" | "Warning" | "Error",
      "suggestion": (string, a clear, concrete explanation of the problem and how to fix it)
    }
  ]
}

If you have absolutely no suggestions, return an empty array [] for 'issues' and a 'final_score' of 10.
Do NOT add commentary or extra text outside the JSON object."#;

#[async_trait]
pub trait AiReviewService: Send + Sync {
    async fn review(&self, req: &CodeRequest) -> Result<AiReviewResult>;
}

/// OpenAI-backed reviewer. Construction succeeds without a credential;
/// `review` fails with a configuration error when the key is absent.
pub struct OpenAiReview {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiReview {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, OPENAI_API_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AiReviewService for OpenAiReview {
    async fn review(&self, req: &CodeRequest) -> Result<AiReviewResult> {
        if req.code.trim().is_empty() {
            bail!("code is empty");
        }
        let api_key = self
            .api_key
            .as_deref()
            .context("OPENAI_API_KEY is not set")?;

        let body = serde_json::json!({
            "model": MODEL,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": req.code },
            ],
        });

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("AI review request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("AI review provider returned {status}: {}", crate::executor::clip(&text, 400));
        }

        let payload: Value = response
            .json()
            .await
            .context("AI review response was not JSON")?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        debug!(raw_len = content.len(), "ai review received");
        Ok(parse_review(&content))
    }
}

/// Map the model's JSON answer onto the structured result. Unparseable
/// output leaves the structured fields empty but retains the raw text.
pub fn parse_review(content: &str) -> AiReviewResult {
    let mut result = AiReviewResult {
        raw_json: Some(content.to_string()),
        ..Default::default()
    };

    let Ok(root) = serde_json::from_str::<Value>(content) else {
        return result;
    };

    result.final_score = root["final_score"].as_i64();
    if let Some(feedback) = root["general_feedback"].as_str() {
        result.general_feedback = feedback.to_string();
    }
    if let Some(issues) = root["issues"].as_array() {
        for issue in issues {
            result.issues.push(AiIssue {
                line_start: issue["line_start"].as_i64(),
                line_end: issue["line_end"].as_i64(),
                severity: issue["severity"].as_str().unwrap_or_default().to_string(),
                suggestion: issue["suggestion"].as_str().unwrap_or_default().to_string(),
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(code: &str) -> CodeRequest {
        CodeRequest {
            action: "analyze".into(),
            code: code.into(),
            language_version: None,
            candidate_id: None,
            candidate_name: None,
            candidate_email: None,
            assignment_id: None,
            assignment_name: None,
        }
    }

    #[test]
    fn parses_complete_review() {
        let content = r#"{
            "final_score": 7,
            "general_feedback": "Solid overall.",
            "issues": [
                {"line_start": 3, "line_end": 5, "severity": "Warning", "suggestion": "Use a StringBuilder."}
            ]
        }"#;
        let result = parse_review(content);
        assert_eq!(result.final_score, Some(7));
        assert_eq!(result.general_feedback, "Solid overall.");
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].line_start, Some(3));
        assert_eq!(result.issues[0].severity, "Warning");
        assert!(result.raw_json.is_some());
    }

    #[test]
    fn partial_fields_are_tolerated() {
        let result = parse_review(r#"{"final_score": 4}"#);
        assert_eq!(result.final_score, Some(4));
        assert!(result.general_feedback.is_empty());
        assert!(result.issues.is_empty());
    }

    #[test]
    fn malformed_output_degrades_but_keeps_raw_text() {
        let result = parse_review("I cannot review this code.");
        assert_eq!(result.final_score, None);
        assert!(result.issues.is_empty());
        assert_eq!(result.raw_json.as_deref(), Some("I cannot review this code."));
    }

    #[tokio::test]
    async fn missing_credential_is_a_configuration_error() {
        let reviewer = OpenAiReview::new(None);
        let err = reviewer.review(&request("class P {}")).await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn empty_code_is_rejected_before_any_request() {
        let reviewer = OpenAiReview::new(Some("test-key".into()));
        let err = reviewer.review(&request("   ")).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn review_round_trips_through_the_provider() {
        use axum::routing::post;

        let canned = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "{\"final_score\": 9, \"general_feedback\": \"ok\", \"issues\": []}"
                }
            }]
        });
        let app = axum::Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let canned = canned.clone();
                async move { axum::Json(canned) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let reviewer = OpenAiReview::with_base_url(
            Some("test-key".into()),
            format!("http://{addr}/v1/chat/completions"),
        );
        let result = reviewer.review(&request("class P {}")).await.unwrap();
        assert_eq!(result.final_score, Some(9));
        assert_eq!(result.general_feedback, "ok");
    }
}
