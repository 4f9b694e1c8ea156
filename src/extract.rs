//! Per-chunk fact extraction against the local model.

use tracing::{debug, warn};

use crate::error::{Result, RepriseError};
use crate::facts::ChunkFactSet;
use crate::llm::{extract_json_object, strip_code_fences, LanguageModel};
use crate::subtitle::Chunk;

/// Episode-level context threaded into every prompt.
#[derive(Debug, Clone)]
pub struct EpisodeContext {
    pub show_title: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub episode_title: String,
    pub episode_overview: String,
    pub cast: Vec<String>,
}

pub struct ChunkExtractor<'a> {
    model: &'a dyn LanguageModel,
}

impl<'a> ChunkExtractor<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self { model }
    }

    /// Extract a confidence-tagged fact set from one chunk.
    ///
    /// Errors here are chunk-local: the caller logs and continues with the
    /// remaining chunks.
    pub async fn extract(
        &self,
        chunk: &Chunk,
        context: &EpisodeContext,
        chunk_index: usize,
        chunk_total: usize,
    ) -> Result<ChunkFactSet> {
        let prompt = build_extraction_prompt(chunk, context, chunk_index, chunk_total);

        let response = self.model.generate(&prompt, true).await?;
        debug!("Raw extraction response for chunk {}: {}", chunk_index + 1, response);

        parse_fact_set(&response)
    }
}

fn build_extraction_prompt(
    chunk: &Chunk,
    context: &EpisodeContext,
    chunk_index: usize,
    chunk_total: usize,
) -> String {
    format!(
        "You are extracting story facts from a TV episode transcript.\n\
         \n\
         Show: {show}\n\
         Episode: S{season:02}E{episode:02} \"{title}\"\n\
         Episode overview: {overview}\n\
         Known characters (use ONLY these names): {cast}\n\
         \n\
         This is excerpt {part} of {total} from the episode's dialogue.\n\
         \n\
         RULES:\n\
         1. Use ONLY the transcript excerpt below as ground truth. Do not invent events.\n\
         2. Refer to characters ONLY by names from the known-characters list.\n\
         3. Tag every item with a confidence level:\n\
            - \"high\": explicitly stated in the dialogue\n\
            - \"medium\": strongly implied by the dialogue\n\
            - \"low\": mentioned once or only indirectly\n\
         \n\
         Return ONLY a JSON object with this exact shape:\n\
         {{\n\
           \"events\": [{{\"description\": \"...\", \"confidence\": \"high\"}}],\n\
           \"character_actions\": [{{\"character\": \"...\", \"action\": \"...\", \"confidence\": \"medium\"}}],\n\
           \"relationship_changes\": [{{\"characters\": [\"...\", \"...\"], \"change\": \"...\", \"confidence\": \"low\"}}]\n\
         }}\n\
         \n\
         [Transcript excerpt]\n\
         {transcript}\n",
        show = context.show_title,
        season = context.season_number,
        episode = context.episode_number,
        title = context.episode_title,
        overview = context.episode_overview,
        cast = context.cast.join(", "),
        part = chunk_index + 1,
        total = chunk_total,
        transcript = chunk.transcript(),
    )
}

/// Parse a model response into a fact set, tolerating markdown fences and
/// surrounding prose.
fn parse_fact_set(response: &str) -> Result<ChunkFactSet> {
    let trimmed = response.trim();

    if let Ok(set) = serde_json::from_str::<ChunkFactSet>(trimmed) {
        return Ok(set);
    }

    let unfenced = strip_code_fences(trimmed);
    if let Ok(set) = serde_json::from_str::<ChunkFactSet>(&unfenced) {
        return Ok(set);
    }

    if let Some(span) = extract_json_object(&unfenced) {
        if let Ok(set) = serde_json::from_str::<ChunkFactSet>(span) {
            return Ok(set);
        }
    }

    warn!("Unparsable extraction response: {}", trimmed);
    Err(RepriseError::Extraction(
        "Model response did not contain a parsable fact set".to_string(),
    ))
}
