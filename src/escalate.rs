//! Rubric-driven escalation decision for the optional polish pass.
//!
//! The breakpoints below are a fixed policy table. Changing them would
//! invalidate output parity with existing cached season recaps, so they are
//! deliberately literal rather than configurable.

/// Which model tier, if any, performs the prose polish pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationTier {
    /// Local model output stands
    None,
    /// Mid-tier cloud model
    Mid,
    /// Top-tier cloud model
    Top,
}

#[derive(Debug, Clone, Copy)]
pub struct EscalationInputs {
    /// Number of episodes in the season under the requested cutoff
    pub episode_count: usize,
    /// Occurrences of "(unconfirmed)" in the synthesized season text
    pub unconfirmed_count: usize,
    /// Caller-supplied importance, clamped to 0-3
    pub user_importance: u8,
    /// Caller-supplied freshness risk, clamped to 0-2
    pub freshness_risk: u8,
}

/// Compute the 0-10 rubric score.
pub fn escalation_score(inputs: EscalationInputs) -> u8 {
    let episode_points = match inputs.episode_count {
        0..=4 => 0,
        5..=9 => 1,
        10..=19 => 2,
        _ => 3,
    };

    let unconfirmed_points = match inputs.unconfirmed_count {
        0..=1 => 0,
        2..=4 => 1,
        _ => 2,
    };

    let score = episode_points
        + unconfirmed_points
        + inputs.user_importance.min(3)
        + inputs.freshness_risk.min(2);

    score.min(10)
}

/// Map a rubric score to an escalation tier.
pub fn decide_tier(score: u8) -> EscalationTier {
    match score {
        0..=3 => EscalationTier::None,
        4..=6 => EscalationTier::Mid,
        _ => EscalationTier::Top,
    }
}

/// Count "(unconfirmed)" markers in a season recap, case-insensitive.
pub fn count_unconfirmed(text: &str) -> usize {
    let lower = text.to_lowercase();
    lower.matches("(unconfirmed)").count()
}

/// Rough polish cost estimate in dollars, recorded with the polished row.
///
/// Assumes roughly four characters per token and a rewrite of similar
/// length to the input.
pub fn estimate_polish_cost(text: &str, tier: EscalationTier) -> f64 {
    let rate_per_million = match tier {
        EscalationTier::None => 0.0,
        EscalationTier::Mid => 0.6,
        EscalationTier::Top => 10.0,
    };

    let tokens = text.len() as f64 / 4.0;
    tokens * 2.0 / 1_000_000.0 * rate_per_million
}
