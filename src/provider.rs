use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::ExtractError;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Fallback order: tried one at a time, fastest and most capable first.
pub const DEFAULT_MODELS: &[&str] = &["gemini-1.5-flash", "gemini-flash-lite-latest"];

/// Prompt contract for roster extraction. The provider is asked for a raw
/// JSON object; the sanitizer assumes nothing about whether it complied.
pub const ROSTER_INSTRUCTION: &str = r#"Role: You are a World-Class Sports Data Engineer and Media Asset Management (MAM) Metadata Specialist.
Objective: Extract high-fidelity athlete roster data from the public web and format it for professional broadcast systems.

1. Extraction Capabilities:
Real-Time Grounding: Use live web search to locate the most recent official player rosters. Cross-reference at least two independent sources (e.g., the official team website and the league's official statistics portal).
Identity Verification: Distinguish between active players and non-player staff. You MUST exclude coaches, managers, trainers, and front-office executives. You MUST also extract the player's primary position (e.g., QB, Striker, Goalkeeper, Center).

2. Intelligent Processing Rules:
Gender Sensitivity (Critical): Strictly maintain gender distinctions. If the query is for a collegiate team and a gender is specified, the output name MUST include the gender.
Traditional Sports Only: Focus exclusively on physical sports. Do not process Esports queries.
Diacritic Normalization: Normalize all names to the standard Latin alphabet. Remove all accents and diacritics (e.g., convert "Sadio Mane" from its accented form).
Title Stripping: Remove all jersey numbers and injury status markers (IL, IR) from the final name strings. The position is a separate field.

3. Output Specifications:
Output must be a RAW JSON object. Do not include markdown formatting.
The JSON must adhere to this structure:
{
  "teamName": "string",
  "sport": "string",
  "players": [
    { "name": "string", "position": "string" }
  ],
  "verifiedSources": ["string"],
  "verificationNotes": "string"
}
Player lists must be sorted alphabetically by last name.

4. Quality Control:
If a roster cannot be verified across multiple sources, flag it as a "Warning" in your verification notes.
Prioritize current season data unless a specific historical year is requested in the search query."#;

/// Prompt contract for search-alias generation.
pub const TAGS_INSTRUCTION: &str = r#"You are an expert Sports Information Director and Metadata Librarian. Your task is to generate search aliases (tags) for athletes to improve findability in a Media Asset Management (MAM) system.

Guidelines:
- Provide 5-10 tags per athlete.
- Include: Common nicknames, phonetic misspellings, jersey numbers (prefixed with #), and historical team abbreviations.
- Avoid generic terms like "player" or "athlete."
- Output ONLY a valid JSON object where the key is the Player Name and the value is an array of strings.
- Strictly no conversational text."#;

/// Raw generation result: the untyped text plus whatever usage figures the
/// provider reported (zero when absent).
#[derive(Debug, Clone, Default)]
pub struct GeneratedText {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One configured extraction provider. The orchestrator only ever sees this
/// seam, so tests drive it with scripted implementations.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<GeneratedText, ExtractError>;
}

/// Gemini `generateContent` client for a single model id. The API key is
/// injected configuration; nothing here reads ambient state.
pub struct GeminiProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(
        client: reqwest::Client,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// The default registry: one provider per model in [`DEFAULT_MODELS`],
    /// sharing a connection pool. No per-request timeout is set here; the
    /// caller may wrap each extraction in one.
    pub fn default_registry(api_key: &str) -> Vec<Box<dyn RosterProvider>> {
        let client = reqwest::Client::new();
        DEFAULT_MODELS
            .iter()
            .map(|model| {
                Box::new(GeminiProvider::new(client.clone(), *model, api_key))
                    as Box<dyn RosterProvider>
            })
            .collect()
    }
}

#[async_trait]
impl RosterProvider for GeminiProvider {
    fn id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<GeneratedText, ExtractError> {
        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model);
        let body = serde_json::json!({
            "system_instruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{ "parts": [{ "text": prompt }] }],
            "tools": [{ "google_search": {} }],
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|e| ExtractError::Unavailable(e.to_string()))?;
        let payload: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);

        if !(200..300).contains(&status) {
            return Err(classify_status(status, &payload, &raw));
        }

        let text = collect_text(&payload).ok_or_else(|| blocked_or_empty(&payload))?;
        debug!("Model {} returned {} chars", self.model, text.len());

        let usage = payload.get("usageMetadata");
        let count = |field: &str| {
            usage
                .and_then(|u| u.get(field))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };

        Ok(GeneratedText {
            text,
            prompt_tokens: count("promptTokenCount"),
            completion_tokens: count("candidatesTokenCount"),
            total_tokens: count("totalTokenCount"),
        })
    }
}

/// Map an HTTP status to the error taxonomy, carrying the provider's own
/// message where the body exposes one.
fn classify_status(status: u16, payload: &Value, raw: &str) -> ExtractError {
    let message = payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| truncate(raw, 200));

    match status {
        400 => ExtractError::BadRequest(message),
        401 | 403 => ExtractError::Auth(message),
        429 => ExtractError::RateLimit(message),
        500..=599 => ExtractError::Unavailable(message),
        _ => ExtractError::Other(format!("HTTP {}: {}", status, message)),
    }
}

/// Concatenate the text parts of the first candidate, if any.
fn collect_text(payload: &Value) -> Option<String> {
    let parts = payload.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// An empty candidate list usually means the safety layer blocked the
/// request; surface the block reason when present.
fn blocked_or_empty(payload: &Value) -> ExtractError {
    match payload
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        Some(reason) => ExtractError::Other(format!("request blocked: {}", reason)),
        None => ExtractError::Other("provider returned an empty response".into()),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_taxonomy() {
        let payload = serde_json::json!({ "error": { "message": "detail" } });
        assert!(matches!(
            classify_status(400, &payload, ""),
            ExtractError::BadRequest(_)
        ));
        assert!(matches!(
            classify_status(401, &payload, ""),
            ExtractError::Auth(_)
        ));
        assert!(matches!(
            classify_status(403, &payload, ""),
            ExtractError::Auth(_)
        ));
        assert!(matches!(
            classify_status(429, &payload, ""),
            ExtractError::RateLimit(_)
        ));
        assert!(matches!(
            classify_status(503, &payload, ""),
            ExtractError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(302, &payload, ""),
            ExtractError::Other(_)
        ));
    }

    #[test]
    fn classification_falls_back_to_raw_body() {
        let err = classify_status(503, &Value::Null, "<html>gateway timeout</html>");
        assert!(err.to_string().contains("gateway timeout"));
    }

    #[test]
    fn collect_text_joins_candidate_parts() {
        let payload = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"teamName\":" }, { "text": "\"Atoms\"}" }] }
            }]
        });
        assert_eq!(
            collect_text(&payload).as_deref(),
            Some("{\"teamName\":\"Atoms\"}")
        );
    }

    #[test]
    fn empty_candidates_report_block_reason() {
        let payload = serde_json::json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        });
        assert!(collect_text(&payload).is_none());
        let err = blocked_or_empty(&payload);
        assert!(err.to_string().contains("SAFETY"));
    }
}
