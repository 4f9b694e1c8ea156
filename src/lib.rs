//! Reprise - Spoiler-Safe Recap Generation
//!
//! A multi-stage pipeline that turns raw episode subtitles into
//! evidence-grounded narrative recaps at episode and season granularity,
//! using a locally-hosted language model for extraction and synthesis and
//! an optional higher-tier cloud model for prose polishing.

pub mod cli;
pub mod config;
pub mod error;
pub mod escalate;
pub mod extract;
pub mod facts;
pub mod library;
pub mod llm;
pub mod pipeline;
pub mod polish;
pub mod store;
pub mod subtitle;
pub mod synthesize;
