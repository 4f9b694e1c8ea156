//! Optional prose-only polish pass against an escalation-selected cloud model.

use std::time::Duration;

use crate::config::PolishConfig;
use crate::error::{Result, RepriseError};
use crate::escalate::EscalationTier;
use crate::llm::{CloudChatClient, LanguageModel};
use crate::synthesize::SEASON_SECTIONS;

/// Resolves the cloud model for an escalation tier at call time.
///
/// Resolution happens per polish attempt, so credential or model changes
/// take effect without rebuilding the pipeline.
#[cfg_attr(test, mockall::automock)]
pub trait PolishModelProvider: Send + Sync {
    /// Returns the resolved model name (as recorded in the cache key) and a
    /// client for it.
    fn resolve(&self, tier: EscalationTier) -> Result<(String, Box<dyn LanguageModel>)>;
}

pub struct CloudPolishProvider {
    config: PolishConfig,
}

impl CloudPolishProvider {
    pub fn new(config: PolishConfig) -> Self {
        Self { config }
    }
}

impl PolishModelProvider for CloudPolishProvider {
    fn resolve(&self, tier: EscalationTier) -> Result<(String, Box<dyn LanguageModel>)> {
        let model = match tier {
            EscalationTier::None => {
                return Err(RepriseError::Config(
                    "No polish model for the unescalated tier".to_string(),
                ))
            }
            EscalationTier::Mid => self.config.mid_model.clone(),
            EscalationTier::Top => self.config.top_model.clone(),
        };

        let api_key = std::env::var(&self.config.api_key_env).map_err(|_| {
            RepriseError::Config(format!(
                "Polish API key not set in environment variable {}",
                self.config.api_key_env
            ))
        })?;

        let client = CloudChatClient::new(
            self.config.endpoint.clone(),
            api_key,
            model.clone(),
            Duration::from_secs(self.config.timeout_secs),
        )?;

        Ok((model, Box::new(client)))
    }
}

pub struct Polisher<'a> {
    model: &'a dyn LanguageModel,
}

impl<'a> Polisher<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self { model }
    }

    /// Rewrite a season recap for clarity and flow without altering facts.
    ///
    /// Failure is non-fatal for the caller: the unpolished text is served
    /// instead.
    pub async fn polish_season(&self, recap_text: &str) -> Result<String> {
        let prompt = build_polish_prompt(recap_text);

        let polished = self
            .model
            .generate(&prompt, false)
            .await
            .map_err(|e| RepriseError::Polish(format!("Polish call failed: {}", e)))?;

        let polished = polished.trim().to_string();
        if polished.is_empty() {
            return Err(RepriseError::Polish("Empty polish response".to_string()));
        }

        Ok(polished)
    }
}

fn build_polish_prompt(recap_text: &str) -> String {
    let headers = SEASON_SECTIONS
        .iter()
        .map(|h| format!("## {}", h))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an editor improving the prose of a season recap.\n\
         \n\
         CONSTRAINTS:\n\
         1. Improve clarity and flow only.\n\
         2. Preserve every section header exactly as written:\n\
         {headers}\n\
         3. Preserve every factual claim, including any \"(unconfirmed)\" markers.\n\
         4. Do not add or remove information.\n\
         5. Keep approximately the same length.\n\
         \n\
         Return only the rewritten recap, nothing else.\n\
         \n\
         [Recap to polish]\n\
         {text}\n",
        headers = headers,
        text = recap_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageModel;

    #[tokio::test]
    async fn test_polish_returns_rewritten_text() {
        let mut model = MockLanguageModel::new();
        model
            .expect_generate()
            .times(1)
            .withf(|prompt, _| {
                prompt.contains("## Season Premise") && prompt.contains("Do not add or remove")
            })
            .returning(|_, _| Ok("## Season Premise\nPolished prose.".to_string()));

        let polisher = Polisher::new(&model);
        let polished = polisher.polish_season("## Season Premise\nRough prose.").await.unwrap();
        assert!(polished.contains("Polished prose."));
    }

    #[tokio::test]
    async fn test_polish_maps_model_failure_to_polish_error() {
        let mut model = MockLanguageModel::new();
        model
            .expect_generate()
            .times(1)
            .returning(|_, _| Err(RepriseError::Model("rate limited".to_string())));

        let polisher = Polisher::new(&model);
        let result = polisher.polish_season("text").await;
        assert!(matches!(result, Err(RepriseError::Polish(_))));
    }

    #[tokio::test]
    async fn test_polish_rejects_empty_response() {
        let mut model = MockLanguageModel::new();
        model
            .expect_generate()
            .times(1)
            .returning(|_, _| Ok("  ".to_string()));

        let polisher = Polisher::new(&model);
        assert!(matches!(
            polisher.polish_season("text").await,
            Err(RepriseError::Polish(_))
        ));
    }
}
