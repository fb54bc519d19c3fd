//! Coaching feedback from a hosted generative language model.

use serde::Deserialize;
use smilefit_core::FeatureVector;
use std::fmt::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("no API key configured")]
    MissingApiKey,
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Parse(String),
    #[error("model returned no text")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

pub struct FeedbackClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    language: String,
}

impl FeedbackClient {
    pub fn new(endpoint: &str, model: &str, api_key: Option<String>, language: &str) -> Self {
        if api_key.is_none() {
            tracing::warn!("no LLM API key set; feedback requests will fail");
        }
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.trim_start_matches("models/").to_string(),
            api_key,
            language: language.to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Ask the model to explain a round score by comparing the two vectors.
    pub async fn feedback(
        &self,
        score: f64,
        user: &FeatureVector,
        teacher: &FeatureVector,
        keys: &[String],
    ) -> Result<String, FeedbackError> {
        let api_key = self.api_key.as_ref().ok_or(FeedbackError::MissingApiKey)?;
        let prompt = build_prompt(score, user, teacher, keys, &self.language);
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&serde_json::json!({
                "contents": [{ "parts": [{ "text": prompt }] }]
            }))
            .send()
            .await
            .map_err(|e| FeedbackError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedbackError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| FeedbackError::Parse(e.to_string()))?;
        let text = response_text(parsed)?;

        tracing::info!(model = %self.model, chars = text.len(), "feedback generated");
        Ok(text)
    }
}

/// Prompt for one round: coaching instructions, the score with two
/// decimals, both vectors and the compared keys.
pub fn build_prompt(
    score: f64,
    user: &FeatureVector,
    teacher: &FeatureVector,
    keys: &[String],
    language: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a facial expression coach. Using the user's action-unit (AU) values and the \
         teacher's reference values, write detailed feedback on the similarity score.\n\
         The feedback must cover:\n\
         1. An overall assessment of the score.\n\
         2. Specific praise for the AUs that matched the teacher closely.\n\
         3. The AUs that differed (e.g. \"AU04 is lower than the teacher's\") with a short, \
         practical tip for each (e.g. \"relax your brows a little\").\n\
         4. Encouragement and a direction for the next round.\n",
    );
    let _ = writeln!(
        prompt,
        "Answer in {language}, in a natural conversational tone, in three to five sentences."
    );
    prompt.push_str("---\n");
    let _ = writeln!(prompt, "Similarity score: {score:.2}");
    let _ = writeln!(prompt, "User AU data: {}", format_vector(user));
    let _ = writeln!(prompt, "Teacher AU data: {}", format_vector(teacher));
    let _ = writeln!(prompt, "Compared AU keys: {}", keys.join(", "));
    prompt.push_str("---\n");
    prompt
}

fn format_vector(vector: &FeatureVector) -> String {
    let items: Vec<String> = vector.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", items.join(", "))
}

fn response_text(response: GenerateResponse) -> Result<String, FeedbackError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(FeedbackError::Empty);
    }
    Ok(text.to_string())
}

/// Text shown to the user when feedback could not be produced.
pub fn failure_message(err: &FeedbackError) -> String {
    format!("Expression feedback could not be generated ({err}). Please try again.")
}
