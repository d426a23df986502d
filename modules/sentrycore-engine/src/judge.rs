//! LLM judges: boundary promotion, push-worthiness, keyword suggestion.
//!
//! All three go through the provider's enforced-JSON structured output. The
//! deterministic fallbacks live here too, next to what they stand in for.

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use ai_client::AiClient;
use sentrycore_common::types::{Goal, Item, MatchFeatures};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BoundaryJudgeOutput {
    /// Promote the boundary match to an immediate push.
    pub promote: bool,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PushWorthinessOutput {
    /// The content itself warrants a user-facing push.
    pub push: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeywordSuggestionOutput {
    pub terms: Vec<String>,
}

#[async_trait]
pub trait JudgeProvider: Send + Sync {
    async fn boundary(
        &self,
        goal: &Goal,
        item: &Item,
        features: &MatchFeatures,
        score: f64,
    ) -> Result<BoundaryJudgeOutput>;

    async fn push_worthiness(&self, goal: &Goal, item: &Item) -> Result<PushWorthinessOutput>;

    async fn suggest_keywords(&self, goal: &Goal) -> Result<KeywordSuggestionOutput>;

    fn model_name(&self) -> &str;
}

pub struct LlmJudge {
    client: AiClient,
}

impl LlmJudge {
    pub fn new(client: AiClient) -> Self {
        Self { client }
    }

    fn item_block(item: &Item) -> String {
        format!(
            "Title: {}\nSnippet: {}\nPublished: {}",
            item.title,
            item.snippet.as_deref().unwrap_or("(none)"),
            item.published_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "(unknown)".to_string()),
        )
    }
}

#[async_trait]
impl JudgeProvider for LlmJudge {
    async fn boundary(
        &self,
        goal: &Goal,
        item: &Item,
        features: &MatchFeatures,
        score: f64,
    ) -> Result<BoundaryJudgeOutput> {
        let system = "You decide whether a borderline match between a user's \
                      interest and a news item deserves an immediate notification. \
                      Promote only when the item clearly advances the user's stated interest.";
        let user = format!(
            "Interest: {}\nDescription: {}\n\n{}\n\nMatch score: {score:.3}\n\
             Required terms matched: {}\nPriority terms matched: {}",
            goal.name,
            goal.description,
            Self::item_block(item),
            features.must_hit == 1,
            features.priority_hit_count,
        );
        self.client.structured(system, &user).await
    }

    async fn push_worthiness(&self, goal: &Goal, item: &Item) -> Result<PushWorthinessOutput> {
        let system = "You decide whether a news item is notable enough to interrupt a \
                      user, as opposed to relevant but routine. Routine release chatter, \
                      minor updates and reposts are not push-worthy.";
        let user = format!(
            "Interest: {}\n\n{}",
            goal.name,
            Self::item_block(item)
        );
        self.client.structured(system, &user).await
    }

    async fn suggest_keywords(&self, goal: &Goal) -> Result<KeywordSuggestionOutput> {
        let system = "Suggest up to 8 short search keywords that would surface items \
                      matching the user's interest. Return only concrete terms.";
        let user = format!("Interest: {}\nDescription: {}", goal.name, goal.description);
        self.client.structured(system, &user).await
    }

    fn model_name(&self) -> &str {
        self.client.chat_model()
    }
}

/// Deterministic stand-in for the boundary judge when the LLM is off or
/// failing: promote iff every MUST term matched and at least one PRIORITY
/// term hit.
pub fn fallback_promote(features: &MatchFeatures) -> bool {
    features.must_hit == 1 && features.priority_hit_count >= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_client::StructuredOutput;

    #[test]
    fn fallback_requires_must_and_priority() {
        let mut f = MatchFeatures {
            must_hit: 1,
            priority_hit_count: 1,
            ..Default::default()
        };
        assert!(fallback_promote(&f));
        f.priority_hit_count = 0;
        assert!(!fallback_promote(&f));
        f.priority_hit_count = 2;
        f.must_hit = 0;
        assert!(!fallback_promote(&f));
    }

    #[test]
    fn judge_schemas_are_strict_objects() {
        for schema in [
            <BoundaryJudgeOutput as StructuredOutput>::json_schema(),
            <PushWorthinessOutput as StructuredOutput>::json_schema(),
            <KeywordSuggestionOutput as StructuredOutput>::json_schema(),
        ] {
            let obj = schema.as_object().unwrap();
            assert_eq!(obj.get("additionalProperties"), Some(&false.into()));
            assert!(obj.contains_key("required"));
        }
    }
}
