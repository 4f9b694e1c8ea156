//! Episode and season narrative synthesis against the local model.

use tracing::debug;

use crate::error::{Result, RepriseError};
use crate::extract::EpisodeContext;
use crate::facts::{ChunkFactSet, Confidence};
use crate::llm::LanguageModel;

/// The five fixed season recap section headers, in order.
pub const SEASON_SECTIONS: [&str; 5] = [
    "Season Premise",
    "Major Arcs",
    "Key Turning Points",
    "Character Trajectories",
    "Unresolved Threads",
];

/// One episode's contribution to a season recap.
#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    pub episode_number: u32,
    pub summary_text: String,
}

#[derive(Debug, Clone)]
pub struct ShowContext {
    pub show_title: String,
    pub season_number: u32,
    pub show_overview: String,
    pub cast: Vec<String>,
}

pub struct Synthesizer<'a> {
    model: &'a dyn LanguageModel,
}

impl<'a> Synthesizer<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self { model }
    }

    /// Produce a narrative episode recap from the merged fact sets.
    ///
    /// Failure here is fatal for the episode; the caller records it.
    pub async fn synthesize_episode(
        &self,
        fact_sets: &[ChunkFactSet],
        context: &EpisodeContext,
    ) -> Result<String> {
        let merged = ChunkFactSet::merge(fact_sets);
        let prompt = build_episode_prompt(&merged, context);

        let recap = self
            .model
            .generate(&prompt, false)
            .await
            .map_err(|e| RepriseError::Synthesis(format!("Episode synthesis failed: {}", e)))?;

        debug!("Episode recap ({} chars)", recap.len());
        Ok(recap.trim().to_string())
    }

    /// Produce a narrative season recap from the available episode recaps.
    pub async fn synthesize_season(
        &self,
        episodes: &[EpisodeSummary],
        context: &ShowContext,
    ) -> Result<String> {
        let prompt = build_season_prompt(episodes, context);

        let recap = self
            .model
            .generate(&prompt, false)
            .await
            .map_err(|e| RepriseError::Synthesis(format!("Season synthesis failed: {}", e)))?;

        debug!("Season recap ({} chars)", recap.len());
        Ok(recap.trim().to_string())
    }
}

fn format_fact_lines(facts: &ChunkFactSet, confidence: Confidence) -> String {
    let mut lines: Vec<String> = facts
        .events_at(confidence)
        .map(|e| format!("- {}", e.description))
        .collect();

    lines.extend(
        facts
            .character_actions
            .iter()
            .filter(|a| a.confidence == confidence)
            .map(|a| format!("- {}: {}", a.character, a.action)),
    );
    lines.extend(
        facts
            .relationship_changes
            .iter()
            .filter(|r| r.confidence == confidence)
            .map(|r| format!("- {}: {}", r.characters.join(" and "), r.change)),
    );

    if lines.is_empty() {
        "- (none)".to_string()
    } else {
        lines.join("\n")
    }
}

fn build_episode_prompt(facts: &ChunkFactSet, context: &EpisodeContext) -> String {
    format!(
        "You are writing a recap of a TV episode from extracted story facts.\n\
         \n\
         Show: {show}\n\
         Episode: S{season:02}E{episode:02} \"{title}\"\n\
         Episode overview: {overview}\n\
         Known characters (use ONLY these names): {cast}\n\
         \n\
         [High-confidence facts — cover these first, state them plainly]\n\
         {high}\n\
         \n\
         [Medium-confidence facts — include with hedging language such as \"appears to\" or \"seems to\"]\n\
         {medium}\n\
         \n\
         [Low-confidence facts — omit, or mention only with an explicit \"(unconfirmed)\" marker]\n\
         {low}\n\
         \n\
         REQUIREMENTS:\n\
         1. Write 150-250 words of narrative prose in past tense.\n\
         2. Never introduce characters outside the known-characters list.\n\
         3. No headers, no lists, no JSON. Prose only.\n\
         \n\
         Write the recap now:",
        show = context.show_title,
        season = context.season_number,
        episode = context.episode_number,
        title = context.episode_title,
        overview = context.episode_overview,
        cast = context.cast.join(", "),
        high = format_fact_lines(facts, Confidence::High),
        medium = format_fact_lines(facts, Confidence::Medium),
        low = format_fact_lines(facts, Confidence::Low),
    )
}

fn build_season_prompt(episodes: &[EpisodeSummary], context: &ShowContext) -> String {
    let episode_block = episodes
        .iter()
        .map(|e| format!("Episode {}:\n{}", e.episode_number, e.summary_text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let headers = SEASON_SECTIONS
        .iter()
        .map(|h| format!("## {}", h))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are writing a season recap of a TV show from its episode recaps.\n\
         \n\
         Show: {show}\n\
         Season: {season}\n\
         Show overview: {overview}\n\
         Known characters (use ONLY these names): {cast}\n\
         \n\
         [Episode recaps, in order]\n\
         {episodes}\n\
         \n\
         REQUIREMENTS:\n\
         1. Write 400-600 words of narrative prose organized under exactly these headers:\n\
         {headers}\n\
         2. Synthesize across episodes. Do NOT recap episode-by-episode.\n\
         3. Carry any \"(unconfirmed)\" markers from the episode recaps into your text\n\
            rather than stating those points as fact.\n\
         4. Never invent characters outside the known-characters list.\n\
         \n\
         Write the season recap now:",
        show = context.show_title,
        season = context.season_number,
        overview = context.show_overview,
        cast = context.cast.join(", "),
        episodes = episode_block,
        headers = headers,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactEvent;
    use crate::llm::MockLanguageModel;

    fn episode_context() -> EpisodeContext {
        EpisodeContext {
            show_title: "Harbor Lights".to_string(),
            season_number: 1,
            episode_number: 3,
            episode_title: "The Storm".to_string(),
            episode_overview: "A storm traps the town.".to_string(),
            cast: vec!["Anna".to_string(), "Ben".to_string()],
        }
    }

    #[tokio::test]
    async fn test_episode_prompt_groups_facts_by_confidence() {
        let facts = ChunkFactSet {
            events: vec![
                FactEvent {
                    description: "The bridge washes out".to_string(),
                    confidence: Confidence::High,
                },
                FactEvent {
                    description: "Ben may have left town".to_string(),
                    confidence: Confidence::Low,
                },
            ],
            ..Default::default()
        };

        let mut model = MockLanguageModel::new();
        model
            .expect_generate()
            .times(1)
            .withf(|prompt, json_format| {
                !*json_format
                    && prompt.contains("The bridge washes out")
                    && prompt.contains("(unconfirmed)")
                    && prompt.contains("150-250 words")
            })
            .returning(|_, _| Ok("The storm came.".to_string()));

        let synthesizer = Synthesizer::new(&model);
        let recap = synthesizer
            .synthesize_episode(&[facts], &episode_context())
            .await
            .unwrap();
        assert_eq!(recap, "The storm came.");
    }

    #[tokio::test]
    async fn test_episode_synthesis_failure_maps_to_synthesis_error() {
        let mut model = MockLanguageModel::new();
        model
            .expect_generate()
            .times(1)
            .returning(|_, _| Err(RepriseError::Model("connection refused".to_string())));

        let synthesizer = Synthesizer::new(&model);
        let result = synthesizer
            .synthesize_episode(&[ChunkFactSet::default()], &episode_context())
            .await;
        assert!(matches!(result, Err(RepriseError::Synthesis(_))));
    }

    #[tokio::test]
    async fn test_season_prompt_lists_episodes_and_headers() {
        let episodes = vec![
            EpisodeSummary {
                episode_number: 1,
                summary_text: "Anna arrived in town.".to_string(),
            },
            EpisodeSummary {
                episode_number: 3,
                summary_text: "The storm hit.".to_string(),
            },
        ];
        let context = ShowContext {
            show_title: "Harbor Lights".to_string(),
            season_number: 1,
            show_overview: "A coastal drama.".to_string(),
            cast: vec!["Anna".to_string()],
        };

        let mut model = MockLanguageModel::new();
        model
            .expect_generate()
            .times(1)
            .withf(|prompt, _| {
                prompt.contains("Episode 1:")
                    && prompt.contains("Episode 3:")
                    && SEASON_SECTIONS.iter().all(|h| prompt.contains(h))
                    && prompt.contains("400-600 words")
            })
            .returning(|_, _| Ok("## Season Premise\n...".to_string()));

        let synthesizer = Synthesizer::new(&model);
        synthesizer.synthesize_season(&episodes, &context).await.unwrap();
    }
}
