//! Recap pipeline orchestration.
//!
//! Composes cleaning, chunking, extraction, synthesis, escalation and
//! polishing over the cache/status store. All stages run sequentially: one
//! model call in flight at a time, chunks in transcript order, episodes in
//! ascending number order.
//!
//! There is no concurrency guard for simultaneous generation under the same
//! cache key; two callers may both miss the cache and do redundant work,
//! last writer wins. Callers needing at-most-once generation must serialize
//! around the pipeline.

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, RepriseError};
use crate::escalate::{
    count_unconfirmed, decide_tier, escalation_score, estimate_polish_cost, EscalationInputs,
    EscalationTier,
};
use crate::extract::{ChunkExtractor, EpisodeContext};
use crate::library::MediaLibrary;
use crate::llm::{LanguageModel, OllamaClient};
use crate::polish::{CloudPolishProvider, PolishModelProvider, Polisher};
use crate::store::{
    EpisodeRecapKey, EpisodeRecapRecord, PipelineStatus, RecapStatus, RecapStore, SeasonRecapKey,
    SeasonRecapRecord,
};
use crate::subtitle::chunk_lines;
use crate::synthesize::{EpisodeSummary, ShowContext, Synthesizer};

#[derive(Debug, Clone)]
pub struct EpisodeRequest {
    pub show_id: String,
    pub season_number: u32,
    pub episode_number: u32,
    /// Highest episode a recap may reference; 0 = no cutoff
    pub spoiler_cutoff: u32,
    pub local_model: String,
    pub prompt_version: String,
    pub force: bool,
}

impl EpisodeRequest {
    fn key(&self) -> EpisodeRecapKey {
        EpisodeRecapKey {
            show_id: self.show_id.clone(),
            season_number: self.season_number,
            episode_number: self.episode_number,
            spoiler_cutoff: self.spoiler_cutoff,
            local_model: self.local_model.clone(),
            prompt_version: self.prompt_version.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonRequest {
    pub show_id: String,
    pub season_number: u32,
    pub spoiler_cutoff: u32,
    pub local_model: String,
    pub prompt_version: String,
    pub polish: bool,
    pub force: bool,
    pub user_importance: u8,
    pub freshness_risk: u8,
}

impl SeasonRequest {
    fn key(&self, polish_model: &str) -> SeasonRecapKey {
        SeasonRecapKey {
            show_id: self.show_id.clone(),
            season_number: self.season_number,
            spoiler_cutoff: self.spoiler_cutoff,
            local_model: self.local_model.clone(),
            prompt_version: self.prompt_version.clone(),
            polish_model: polish_model.to_string(),
        }
    }
}

pub struct RecapPipeline {
    library: Box<dyn MediaLibrary>,
    store: RecapStore,
    local: Box<dyn LanguageModel>,
    polish: Option<Box<dyn PolishModelProvider>>,
    chunk_duration_secs: f64,
    cast_limit: usize,
}

impl RecapPipeline {
    pub fn new(
        library: Box<dyn MediaLibrary>,
        store: RecapStore,
        local: Box<dyn LanguageModel>,
        polish: Option<Box<dyn PolishModelProvider>>,
        chunk_duration_secs: f64,
        cast_limit: usize,
    ) -> Self {
        Self {
            library,
            store,
            local,
            polish,
            chunk_duration_secs,
            cast_limit,
        }
    }

    /// Build a pipeline from configuration: Ollama local model, cloud polish
    /// provider when enabled.
    pub fn from_config(
        config: &Config,
        library: Box<dyn MediaLibrary>,
        store: RecapStore,
    ) -> Result<Self> {
        let min_interval = (config.local_model.min_request_interval_ms > 0)
            .then(|| Duration::from_millis(config.local_model.min_request_interval_ms));

        let local = OllamaClient::new(
            config.local_model.endpoint.clone(),
            config.local_model.model.clone(),
            Duration::from_secs(config.local_model.extract_timeout_secs),
            Duration::from_secs(config.local_model.synthesis_timeout_secs),
            min_interval,
        )?;

        let polish: Option<Box<dyn PolishModelProvider>> = config
            .polish
            .enabled
            .then(|| {
                Box::new(CloudPolishProvider::new(config.polish.clone()))
                    as Box<dyn PolishModelProvider>
            });

        Ok(Self::new(
            library,
            store,
            Box::new(local),
            polish,
            config.pipeline.chunk_duration_secs,
            config.pipeline.cast_limit,
        ))
    }

    /// Generate (or serve from cache) a narrative recap for one episode.
    pub async fn generate_episode_recap(&self, req: &EpisodeRequest) -> Result<String> {
        if req.spoiler_cutoff != 0 && req.episode_number > req.spoiler_cutoff {
            return Err(RepriseError::SpoilerCutoff {
                episode: req.episode_number,
                cutoff: req.spoiler_cutoff,
            });
        }

        let key = req.key();

        if !req.force {
            if let Some(record) = self.store.get_episode(&key).await? {
                if record.status == RecapStatus::Completed {
                    if let Some(text) = record.summary_text {
                        info!(
                            "Episode recap cache hit: {} S{:02}E{:02}",
                            req.show_id, req.season_number, req.episode_number
                        );
                        return Ok(text);
                    }
                }
            }
        }

        let show = self
            .library
            .show(&req.show_id)
            .await?
            .ok_or_else(|| RepriseError::NotFound(format!("show {}", req.show_id)))?;
        let episode = self
            .library
            .episode(&req.show_id, req.season_number, req.episode_number)
            .await?
            .ok_or_else(|| {
                RepriseError::NotFound(format!(
                    "episode {} S{:02}E{:02}",
                    req.show_id, req.season_number, req.episode_number
                ))
            })?;
        let cast = self.library.cast(&req.show_id, self.cast_limit).await?;

        let lines = self
            .library
            .subtitles(&req.show_id, req.season_number, req.episode_number)
            .await?;
        if lines.is_empty() {
            return Err(RepriseError::NoEvidence(format!(
                "no subtitles for {} S{:02}E{:02}",
                req.show_id, req.season_number, req.episode_number
            )));
        }

        let chunks = chunk_lines(&lines, self.chunk_duration_secs);
        if chunks.is_empty() {
            return Err(RepriseError::NoEvidence(format!(
                "all subtitle lines for {} S{:02}E{:02} were non-speech",
                req.show_id, req.season_number, req.episode_number
            )));
        }

        let started = Instant::now();
        self.store.begin_episode_generation(&key).await?;

        let context = EpisodeContext {
            show_title: show.title,
            season_number: req.season_number,
            episode_number: req.episode_number,
            episode_title: episode.title,
            episode_overview: episode.overview,
            cast,
        };

        let extractor = ChunkExtractor::new(self.local.as_ref());
        let total = chunks.len();
        let mut fact_sets = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            match extractor.extract(chunk, &context, index, total).await {
                Ok(facts) => fact_sets.push(facts),
                Err(e) => {
                    warn!("Chunk {}/{} contributed no facts: {}", index + 1, total, e);
                }
            }
        }

        if fact_sets.is_empty() {
            let message = format!("All {} chunks failed fact extraction", total);
            self.store.fail_episode(&key, &message).await?;
            return Err(RepriseError::Extraction(message));
        }

        let synthesizer = Synthesizer::new(self.local.as_ref());
        let summary = match synthesizer.synthesize_episode(&fact_sets, &context).await {
            Ok(summary) => summary,
            Err(e) => {
                self.store.fail_episode(&key, &e.to_string()).await?;
                return Err(e);
            }
        };

        let raw_facts = serde_json::to_string(&fact_sets)?;
        self.store
            .complete_episode(&key, &summary, &raw_facts, started.elapsed().as_secs_f64())
            .await?;

        info!(
            "Episode recap completed: {} S{:02}E{:02} ({} chunks, {} usable)",
            req.show_id,
            req.season_number,
            req.episode_number,
            total,
            fact_sets.len()
        );

        Ok(summary)
    }

    /// Generate (or serve from cache) a narrative recap for one season.
    pub async fn generate_season_recap(&self, req: &SeasonRequest) -> Result<String> {
        let base_key = req.key("");

        if !req.force {
            if let Some(record) = self
                .store
                .get_season_preferring_polished(
                    &req.show_id,
                    req.season_number,
                    req.spoiler_cutoff,
                    &req.local_model,
                    &req.prompt_version,
                )
                .await?
            {
                if record.status == RecapStatus::Completed {
                    if let Some(text) = record.display_text().map(|t| t.to_string()) {
                        info!(
                            "Season recap cache hit: {} season {}",
                            req.show_id, req.season_number
                        );

                        // A cached unpolished recap can still be escalated
                        // without redoing extraction and synthesis.
                        if req.polish && record.polish_model.is_empty() {
                            let mut source = parse_source_episodes(&record);
                            if source.is_empty() {
                                // Rows written before source tracking carry no
                                // episode list; score from the library instead.
                                source = self.cutoff_episode_numbers(req).await?;
                            }
                            if let Some(polished) =
                                self.maybe_polish(req, &text, source.len(), &source).await?
                            {
                                return Ok(polished);
                            }
                        }

                        return Ok(text);
                    }
                }
            }
        }

        let show = self
            .library
            .show(&req.show_id)
            .await?
            .ok_or_else(|| RepriseError::NotFound(format!("show {}", req.show_id)))?;
        let cast = self.library.cast(&req.show_id, self.cast_limit).await?;

        let mut episode_numbers = self
            .library
            .episode_numbers(&req.show_id, req.season_number)
            .await?;
        if episode_numbers.is_empty() {
            return Err(RepriseError::NotFound(format!(
                "no episodes for {} season {}",
                req.show_id, req.season_number
            )));
        }
        if req.spoiler_cutoff != 0 {
            episode_numbers.retain(|&e| e <= req.spoiler_cutoff);
            if episode_numbers.is_empty() {
                return Err(RepriseError::NoEvidence(format!(
                    "no episodes of {} season {} at or below cutoff {}",
                    req.show_id, req.season_number, req.spoiler_cutoff
                )));
            }
        }

        let started = Instant::now();
        self.store.begin_season_generation(&base_key).await?;

        let mut summaries: Vec<EpisodeSummary> = Vec::new();
        let mut first_error: Option<String> = None;

        for &episode_number in &episode_numbers {
            let episode_req = EpisodeRequest {
                show_id: req.show_id.clone(),
                season_number: req.season_number,
                episode_number,
                spoiler_cutoff: req.spoiler_cutoff,
                local_model: req.local_model.clone(),
                prompt_version: req.prompt_version.clone(),
                force: false,
            };

            match self.generate_episode_recap(&episode_req).await {
                Ok(summary_text) => summaries.push(EpisodeSummary {
                    episode_number,
                    summary_text,
                }),
                Err(e) => {
                    warn!(
                        "Episode {} excluded from season recap: {}",
                        episode_number, e
                    );
                    first_error.get_or_insert(e.to_string());
                }
            }
        }

        if summaries.is_empty() {
            let message = first_error
                .unwrap_or_else(|| "no episode recaps available".to_string());
            self.store.fail_season(&base_key, &message).await?;
            return Err(RepriseError::Synthesis(message));
        }

        let context = ShowContext {
            show_title: show.title,
            season_number: req.season_number,
            show_overview: show.overview,
            cast,
        };

        let synthesizer = Synthesizer::new(self.local.as_ref());
        let season_text = match synthesizer.synthesize_season(&summaries, &context).await {
            Ok(text) => text,
            Err(e) => {
                self.store.fail_season(&base_key, &e.to_string()).await?;
                return Err(e);
            }
        };

        let source: Vec<u32> = summaries.iter().map(|s| s.episode_number).collect();
        self.store
            .complete_season(
                &base_key,
                &season_text,
                None,
                None,
                &source,
                started.elapsed().as_secs_f64(),
            )
            .await?;

        info!(
            "Season recap completed: {} season {} ({}/{} episodes)",
            req.show_id,
            req.season_number,
            summaries.len(),
            episode_numbers.len()
        );

        if req.polish {
            if let Some(polished) = self
                .maybe_polish(req, &season_text, episode_numbers.len(), &source)
                .await?
            {
                return Ok(polished);
            }
        }

        Ok(season_text)
    }

    /// Episode numbers for the season under the request's cutoff.
    async fn cutoff_episode_numbers(&self, req: &SeasonRequest) -> Result<Vec<u32>> {
        let mut numbers = self
            .library
            .episode_numbers(&req.show_id, req.season_number)
            .await?;
        if req.spoiler_cutoff != 0 {
            numbers.retain(|&e| e <= req.spoiler_cutoff);
        }
        Ok(numbers)
    }

    /// Score the season and, when a tier is selected, attempt the polish
    /// pass. Returns the polished text on success. Polish failure is
    /// non-fatal: the unpolished row stands and `None` is returned.
    async fn maybe_polish(
        &self,
        req: &SeasonRequest,
        season_text: &str,
        episode_count: usize,
        source_episodes: &[u32],
    ) -> Result<Option<String>> {
        let Some(provider) = self.polish.as_ref() else {
            return Ok(None);
        };

        let score = escalation_score(EscalationInputs {
            episode_count,
            unconfirmed_count: count_unconfirmed(season_text),
            user_importance: req.user_importance,
            freshness_risk: req.freshness_risk,
        });
        let tier = decide_tier(score);
        info!(
            "Escalation score {} for {} season {}: {:?}",
            score, req.show_id, req.season_number, tier
        );

        if tier == EscalationTier::None {
            return Ok(None);
        }

        let (model_name, model) = match provider.resolve(tier) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Polish model unavailable, serving unpolished text: {}", e);
                return Ok(None);
            }
        };

        let polisher = Polisher::new(model.as_ref());
        match polisher.polish_season(season_text).await {
            Ok(polished) => {
                let cost = estimate_polish_cost(season_text, tier);
                let polished_key = req.key(&model_name);
                self.store.begin_season_generation(&polished_key).await?;
                self.store
                    .complete_season(
                        &polished_key,
                        season_text,
                        Some(&polished),
                        Some(cost),
                        source_episodes,
                        0.0,
                    )
                    .await?;
                Ok(Some(polished))
            }
            Err(e) => {
                warn!("Polish failed, serving unpolished text: {}", e);
                Ok(None)
            }
        }
    }

    /// Cache read only; never triggers generation.
    pub async fn get_episode_recap(
        &self,
        key: &EpisodeRecapKey,
    ) -> Result<Option<EpisodeRecapRecord>> {
        self.store.get_episode(key).await
    }

    /// Cache read only; returns the polished variant when one exists.
    pub async fn get_season_recap(
        &self,
        show_id: &str,
        season_number: u32,
        spoiler_cutoff: u32,
        local_model: &str,
        prompt_version: &str,
    ) -> Result<Option<SeasonRecapRecord>> {
        self.store
            .get_season_preferring_polished(
                show_id,
                season_number,
                spoiler_cutoff,
                local_model,
                prompt_version,
            )
            .await
    }

    pub async fn pipeline_status(&self, show_id: Option<&str>) -> Result<PipelineStatus> {
        self.store.status_counts(show_id).await
    }
}

fn parse_source_episodes(record: &SeasonRecapRecord) -> Vec<u32> {
    record
        .source_episodes
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{EpisodeMeta, MockMediaLibrary, ShowMeta};
    use crate::llm::MockLanguageModel;
    use crate::polish::MockPolishModelProvider;
    use crate::subtitle::SubtitleLine;
    use sqlx::SqlitePool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const FACTS_JSON: &str = r#"{
        "events": [{"description": "The bridge washes out", "confidence": "high"}],
        "character_actions": [],
        "relationship_changes": []
    }"#;

    async fn setup_store() -> RecapStore {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        let store = RecapStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn subtitle_lines() -> Vec<SubtitleLine> {
        // Three chunks at a 600s target: one line each at 0, 600, 1200.
        [0.0, 600.0, 1200.0]
            .iter()
            .enumerate()
            .map(|(i, &start)| SubtitleLine {
                start_time: start,
                end_time: start + 2.0,
                speaker: Some("ANNA".to_string()),
                text: format!("Dialogue line {}.", i + 1),
            })
            .collect()
    }

    fn library_for_episode(episodes_with_subtitles: Vec<u32>, all_episodes: Vec<u32>) -> MockMediaLibrary {
        let mut library = MockMediaLibrary::new();
        library.expect_show().returning(|_| {
            Ok(Some(ShowMeta {
                title: "Harbor Lights".to_string(),
                overview: "A coastal drama.".to_string(),
            }))
        });
        library.expect_episode().returning(|_, _, episode| {
            Ok(Some(EpisodeMeta {
                title: format!("Episode {}", episode),
                overview: "Things happen.".to_string(),
            }))
        });
        library
            .expect_cast()
            .returning(|_, _| Ok(vec!["Anna".to_string(), "Ben".to_string()]));
        library
            .expect_episode_numbers()
            .returning(move |_, _| Ok(all_episodes.clone()));
        library.expect_subtitles().returning(move |_, _, episode| {
            if episodes_with_subtitles.contains(&episode) {
                Ok(subtitle_lines())
            } else {
                Ok(Vec::new())
            }
        });
        library
    }

    /// Local model that answers extraction calls with facts JSON and
    /// synthesis calls with prose, counting each.
    fn scripted_local_model(
        expected_calls: usize,
        extraction_counter: Arc<AtomicUsize>,
        failing_extractions: Vec<usize>,
    ) -> MockLanguageModel {
        let mut model = MockLanguageModel::new();
        model
            .expect_generate()
            .times(expected_calls)
            .returning(move |prompt, json_format| {
                if json_format {
                    let call = extraction_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if failing_extractions.contains(&call) {
                        Ok("no json today".to_string())
                    } else {
                        Ok(FACTS_JSON.to_string())
                    }
                } else if prompt.contains("season recap") {
                    Ok("## Season Premise\nThe season text.".to_string())
                } else {
                    Ok("The episode recap.".to_string())
                }
            });
        model
    }

    fn episode_request() -> EpisodeRequest {
        EpisodeRequest {
            show_id: "tt1".to_string(),
            season_number: 1,
            episode_number: 1,
            spoiler_cutoff: 0,
            local_model: "llama3.2:3b".to_string(),
            prompt_version: "v1".to_string(),
            force: false,
        }
    }

    fn season_request() -> SeasonRequest {
        SeasonRequest {
            show_id: "tt1".to_string(),
            season_number: 1,
            spoiler_cutoff: 0,
            local_model: "llama3.2:3b".to_string(),
            prompt_version: "v1".to_string(),
            polish: false,
            force: false,
            user_importance: 0,
            freshness_risk: 0,
        }
    }

    fn pipeline(
        library: MockMediaLibrary,
        store: RecapStore,
        model: MockLanguageModel,
        polish: Option<Box<dyn PolishModelProvider>>,
    ) -> RecapPipeline {
        RecapPipeline::new(
            Box::new(library),
            store,
            Box::new(model),
            polish,
            600.0,
            50,
        )
    }

    #[tokio::test]
    async fn test_episode_generation_is_idempotent() {
        let store = setup_store().await;
        let library = library_for_episode(vec![1], vec![1]);
        // 3 extraction calls + 1 synthesis; a second generation round would
        // exceed the expectation and fail the test.
        let model = scripted_local_model(4, Arc::new(AtomicUsize::new(0)), vec![]);
        let pipeline = pipeline(library, store, model, None);

        let first = pipeline.generate_episode_recap(&episode_request()).await.unwrap();
        let second = pipeline.generate_episode_recap(&episode_request()).await.unwrap();
        assert_eq!(first, "The episode recap.");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cutoff_refused_without_model_call_or_persistence() {
        let store = setup_store().await;
        // No expectations: any library or model call panics the mock.
        let library = MockMediaLibrary::new();
        let model = MockLanguageModel::new();
        let pipeline = pipeline(library, store.clone(), model, None);

        let mut req = episode_request();
        req.episode_number = 7;
        req.spoiler_cutoff = 5;

        let result = pipeline.generate_episode_recap(&req).await;
        assert!(matches!(
            result,
            Err(RepriseError::SpoilerCutoff { episode: 7, cutoff: 5 })
        ));

        let status = store.status_counts(None).await.unwrap();
        assert_eq!(status.episodes, Default::default());
    }

    #[tokio::test]
    async fn test_no_subtitles_is_not_persisted_as_failed() {
        let store = setup_store().await;
        let library = library_for_episode(vec![], vec![1]);
        let model = MockLanguageModel::new();
        let pipeline = pipeline(library, store.clone(), model, None);

        let result = pipeline.generate_episode_recap(&episode_request()).await;
        assert!(matches!(result, Err(RepriseError::NoEvidence(_))));

        let status = store.status_counts(None).await.unwrap();
        assert_eq!(status.episodes.failed, 0);
    }

    #[tokio::test]
    async fn test_partial_chunk_failure_still_completes_episode() {
        let store = setup_store().await;
        let library = library_for_episode(vec![1], vec![1]);
        // Chunk 2 of 3 returns unparsable text; extraction continues.
        let model = scripted_local_model(4, Arc::new(AtomicUsize::new(0)), vec![2]);
        let pipeline = pipeline(library, store.clone(), model, None);

        let recap = pipeline.generate_episode_recap(&episode_request()).await.unwrap();
        assert_eq!(recap, "The episode recap.");

        let req = episode_request();
        let record = pipeline.get_episode_recap(&req.key()).await.unwrap().unwrap();
        assert_eq!(record.status, RecapStatus::Completed);

        let fact_sets: Vec<serde_json::Value> =
            serde_json::from_str(record.raw_chunk_facts.as_deref().unwrap()).unwrap();
        assert_eq!(fact_sets.len(), 2);
    }

    #[tokio::test]
    async fn test_all_chunks_failing_fails_the_episode() {
        let store = setup_store().await;
        let library = library_for_episode(vec![1], vec![1]);
        // All 3 extractions fail; synthesis is never attempted.
        let model = scripted_local_model(3, Arc::new(AtomicUsize::new(0)), vec![1, 2, 3]);
        let pipeline = pipeline(library, store.clone(), model, None);

        let result = pipeline.generate_episode_recap(&episode_request()).await;
        assert!(matches!(result, Err(RepriseError::Extraction(_))));

        let req = episode_request();
        let record = pipeline.get_episode_recap(&req.key()).await.unwrap().unwrap();
        assert_eq!(record.status, RecapStatus::Failed);
        assert!(record.error_message.is_some());
        assert!(record.summary_text.is_none());
    }

    #[tokio::test]
    async fn test_season_degrades_on_partial_episode_failure() {
        let store = setup_store().await;
        // Episode 2 has no subtitles and is silently excluded.
        let library = library_for_episode(vec![1, 3], vec![1, 2, 3]);
        // Episodes 1 and 3: (3 extractions + 1 synthesis) each, + 1 season call.
        let model = scripted_local_model(9, Arc::new(AtomicUsize::new(0)), vec![]);
        let pipeline = pipeline(library, store.clone(), model, None);

        let recap = pipeline.generate_season_recap(&season_request()).await.unwrap();
        assert!(recap.contains("The season text."));

        let record = pipeline
            .get_season_recap("tt1", 1, 0, "llama3.2:3b", "v1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecapStatus::Completed);
        assert_eq!(record.source_episodes.as_deref(), Some("[1,3]"));
    }

    #[tokio::test]
    async fn test_season_fails_when_every_episode_fails() {
        let store = setup_store().await;
        let library = library_for_episode(vec![], vec![1, 2, 3]);
        let model = MockLanguageModel::new();
        let pipeline = pipeline(library, store.clone(), model, None);

        let result = pipeline.generate_season_recap(&season_request()).await;
        match result {
            Err(RepriseError::Synthesis(message)) => {
                assert!(message.contains("No subtitle evidence"));
            }
            other => panic!("expected synthesis error, got {:?}", other.map(|_| ())),
        }

        let record = pipeline
            .get_season_recap("tt1", 1, 0, "llama3.2:3b", "v1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecapStatus::Failed);
    }

    #[tokio::test]
    async fn test_polish_failure_falls_back_to_unpolished_row() {
        let store = setup_store().await;
        let library = library_for_episode(vec![1], vec![1]);
        let model = scripted_local_model(5, Arc::new(AtomicUsize::new(0)), vec![]);

        let mut provider = MockPolishModelProvider::new();
        provider.expect_resolve().times(1).returning(|_| {
            let mut cloud = MockLanguageModel::new();
            cloud
                .expect_generate()
                .times(1)
                .returning(|_, _| Err(RepriseError::Model("rate limited".to_string())));
            Ok(("gpt-4o-mini".to_string(), Box::new(cloud) as Box<dyn LanguageModel>))
        });

        let mut req = season_request();
        req.polish = true;
        // Score: 0 episodes pts + 0 unconfirmed + 3 + 2 = 5 -> mid tier.
        req.user_importance = 3;
        req.freshness_risk = 2;

        let pipeline = pipeline(library, store.clone(), model, Some(Box::new(provider)));
        let recap = pipeline.generate_season_recap(&req).await.unwrap();
        assert!(recap.contains("The season text."));

        // The polished row was never created; the "" key is served.
        let record = pipeline
            .get_season_recap("tt1", 1, 0, "llama3.2:3b", "v1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecapStatus::Completed);
        assert_eq!(record.polish_model, "");
        assert!(record.polished_text.is_none());
    }

    #[tokio::test]
    async fn test_polish_success_creates_distinct_polished_row() {
        let store = setup_store().await;
        let library = library_for_episode(vec![1], vec![1]);
        let model = scripted_local_model(5, Arc::new(AtomicUsize::new(0)), vec![]);

        let mut provider = MockPolishModelProvider::new();
        provider.expect_resolve().times(1).returning(|_| {
            let mut cloud = MockLanguageModel::new();
            cloud
                .expect_generate()
                .times(1)
                .returning(|_, _| Ok("## Season Premise\nPolished season text.".to_string()));
            Ok(("gpt-4o-mini".to_string(), Box::new(cloud) as Box<dyn LanguageModel>))
        });

        let mut req = season_request();
        req.polish = true;
        req.user_importance = 3;
        req.freshness_risk = 2;

        let pipeline = pipeline(library, store.clone(), model, Some(Box::new(provider)));
        let recap = pipeline.generate_season_recap(&req).await.unwrap();
        assert!(recap.contains("Polished season text."));

        let record = pipeline
            .get_season_recap("tt1", 1, 0, "llama3.2:3b", "v1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.polish_model, "gpt-4o-mini");
        assert!(record.polish_cost.unwrap() > 0.0);
        assert_eq!(
            record.display_text(),
            Some("## Season Premise\nPolished season text.")
        );
    }

    #[tokio::test]
    async fn test_cached_recap_polish_scores_from_library_when_sources_missing() {
        // Season rows written before source tracking have no episode list;
        // escalation must then count episodes through the library rather
        // than score the season as empty.
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        let store = RecapStore::new(pool.clone());
        store.init_schema().await.unwrap();

        let key = season_request().key("");
        store.begin_season_generation(&key).await.unwrap();
        store
            .complete_season(&key, "The season text.", None, None, &[], 1.0)
            .await
            .unwrap();
        sqlx::query("UPDATE season_recaps SET source_episodes = NULL")
            .execute(&pool)
            .await
            .unwrap();

        // Cache hit: only the episode listing may be consulted.
        let mut library = MockMediaLibrary::new();
        library
            .expect_episode_numbers()
            .times(1)
            .returning(|_, _| Ok((1..=10).collect()));

        // 10 episodes -> 2 points, importance 3 -> score 5, mid tier. A
        // deflated count of zero would stay local and never resolve.
        let mut provider = MockPolishModelProvider::new();
        provider.expect_resolve().times(1).returning(|_| {
            let mut cloud = MockLanguageModel::new();
            cloud
                .expect_generate()
                .times(1)
                .returning(|_, _| Ok("Polished from cache.".to_string()));
            Ok(("gpt-4o-mini".to_string(), Box::new(cloud) as Box<dyn LanguageModel>))
        });

        let mut req = season_request();
        req.polish = true;
        req.user_importance = 3;

        let pipeline = pipeline(
            library,
            store,
            MockLanguageModel::new(),
            Some(Box::new(provider)),
        );
        let recap = pipeline.generate_season_recap(&req).await.unwrap();
        assert_eq!(recap, "Polished from cache.");
    }

    #[tokio::test]
    async fn test_low_score_skips_polish_entirely() {
        let store = setup_store().await;
        let library = library_for_episode(vec![1], vec![1]);
        let model = scripted_local_model(5, Arc::new(AtomicUsize::new(0)), vec![]);

        // resolve() must never be called for an unescalated season.
        let provider = MockPolishModelProvider::new();

        let mut req = season_request();
        req.polish = true;

        let pipeline = pipeline(library, store, model, Some(Box::new(provider)));
        let recap = pipeline.generate_season_recap(&req).await.unwrap();
        assert!(recap.contains("The season text."));
    }
}
