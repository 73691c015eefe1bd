//! Prompt-cache cost impact model
//!
//! Turns an analyzer breakdown into per-turn cost under cache-read /
//! cache-write pricing, estimates the post-trim token count from the
//! trimmable buckets, and computes the break-even point where trimming
//! pays for the one-time cache rewrite it causes.

use crate::analyze::{SessionAnalysis, SYSTEM_OVERHEAD_TOKENS};
use crate::error::Result;
use serde::Serialize;
use std::path::Path;

/// Steady-state fraction of the prompt served from cache.
pub const DEFAULT_CACHE_HIT_RATE: f64 = 0.90;

/// Projection horizons reported to callers.
pub const PROJECTION_TURNS: [u32; 4] = [5, 10, 20, 50];

/// Share of the tool-result bucket the trimmer actually removes.
/// Calibration constant, not a measurement.
const TOOL_RESULT_TRIM_SHARE: f64 = 0.7;

/// Share of the tool-input bucket the trimmer actually removes.
const TOOL_USE_TRIM_SHARE: f64 = 0.3;

/// Bytes each stub message adds back per stubbed tool result.
const STUB_OVERHEAD_BYTES: f64 = 35.0;

/// Removal ratio ceiling; conversation always remains.
const MAX_REMOVAL_RATIO: f64 = 0.95;

/// Pricing row in dollars per million tokens.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelPricing {
    /// Key matched against user-supplied model names.
    pub key: &'static str,
    pub display_name: &'static str,
    pub input_per_mtok: f64,
    pub cache_write_per_mtok: f64,
    pub cache_read_per_mtok: f64,
}

/// Known pricing rows. Cache writes are 1.25x input; reads are 0.1x.
pub const KNOWN_MODELS: &[ModelPricing] = &[
    ModelPricing {
        key: "sonnet",
        display_name: "Sonnet 4",
        input_per_mtok: 3.00,
        cache_write_per_mtok: 3.75,
        cache_read_per_mtok: 0.30,
    },
    ModelPricing {
        key: "opus",
        display_name: "Opus 4.6",
        input_per_mtok: 5.00,
        cache_write_per_mtok: 6.25,
        cache_read_per_mtok: 0.50,
    },
    ModelPricing {
        key: "opus-4",
        display_name: "Opus 4/4.1",
        input_per_mtok: 15.00,
        cache_write_per_mtok: 18.75,
        cache_read_per_mtok: 1.50,
    },
    ModelPricing {
        key: "haiku",
        display_name: "Haiku 4.5",
        input_per_mtok: 1.00,
        cache_write_per_mtok: 1.25,
        cache_read_per_mtok: 0.10,
    },
];

/// Find a pricing row: exact key first, then the longest key contained in
/// the supplied name, so "claude-opus-4-1" resolves to the Opus 4/4.1 row
/// rather than plain "opus".
pub fn pricing_for(model: &str) -> Option<&'static ModelPricing> {
    let needle = model.to_ascii_lowercase();
    if let Some(exact) = KNOWN_MODELS.iter().find(|p| p.key == needle) {
        return Some(exact);
    }
    KNOWN_MODELS
        .iter()
        .filter(|p| needle.contains(p.key))
        .max_by_key(|p| p.key.len())
}

/// Cost projection over a fixed number of turns.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostProjection {
    pub turns: u32,
    pub without_trim: f64,
    pub with_trim: f64,
    pub saved_percent: f64,
}

/// Derived cost report; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CacheImpactReport {
    pub model: String,
    pub cache_hit_rate: f64,
    pub pre_trim_tokens: u64,
    pub post_trim_tokens: u64,
    pub reduction_percent: f64,
    /// Steady-state cost per turn at the pre-trim size.
    pub baseline_cost_per_turn: f64,
    /// Cold-cache cost of the first post-trim turn.
    pub first_turn_cost: f64,
    /// Steady-state cost per turn at the post-trim size.
    pub steady_state_cost: f64,
    /// One-time extra cost of the first post-trim turn over the baseline.
    pub cache_miss_penalty: f64,
    /// Turn count after which trimming is cheaper overall; None when the
    /// per-turn savings are not positive.
    pub break_even_turns: Option<u64>,
    pub projections: Vec<CostProjection>,
}

/// Steady-state cost of one turn at `tokens` under the given hit rate.
fn cost_per_turn(tokens: u64, hit_rate: f64, pricing: &ModelPricing) -> f64 {
    let tokens = tokens as f64;
    let cached = tokens * hit_rate;
    let fresh = tokens * (1.0 - hit_rate);
    cached / 1e6 * pricing.cache_read_per_mtok + fresh / 1e6 * pricing.cache_write_per_mtok
}

/// Cost of a turn with nothing cached.
fn cold_cost(tokens: u64, pricing: &ModelPricing) -> f64 {
    tokens as f64 / 1e6 * pricing.cache_write_per_mtok
}

/// Estimate the token count a trim at default settings would leave.
///
/// File history and signatures go away entirely; tool results and tool
/// inputs shrink by their trimmable shares, with the stub text added back.
pub fn estimate_post_trim_tokens(analysis: &SessionAnalysis) -> u64 {
    if analysis.total_bytes == 0 {
        return analysis.estimated_tokens;
    }

    let b = &analysis.breakdown;
    let removed_bytes = b.file_history.bytes as f64
        + b.thinking_signatures.bytes as f64
        + TOOL_RESULT_TRIM_SHARE * b.tool_results.bytes as f64
        - STUB_OVERHEAD_BYTES * b.tool_results.count as f64
        + TOOL_USE_TRIM_SHARE * b.tool_use_requests.bytes as f64;

    let ratio = (removed_bytes / analysis.total_bytes as f64).clamp(0.0, MAX_REMOVAL_RATIO);
    let content_tokens = analysis.estimated_tokens.saturating_sub(SYSTEM_OVERHEAD_TOKENS);
    let post = (content_tokens as f64 * (1.0 - ratio)).round() as u64 + SYSTEM_OVERHEAD_TOKENS;
    post.min(analysis.estimated_tokens)
}

/// Build a report from explicit token counts.
pub fn cache_impact_for_tokens(
    pre_trim_tokens: u64,
    post_trim_tokens: u64,
    pricing: &ModelPricing,
    cache_hit_rate: f64,
) -> CacheImpactReport {
    let baseline = cost_per_turn(pre_trim_tokens, cache_hit_rate, pricing);
    let steady = cost_per_turn(post_trim_tokens, cache_hit_rate, pricing);
    let first = cold_cost(post_trim_tokens, pricing);

    let penalty = first - baseline;
    let savings = baseline - steady;
    let break_even_turns = if savings > 0.0 {
        Some((penalty / savings).ceil() as u64 + 1)
    } else {
        None
    };

    let projections = PROJECTION_TURNS
        .iter()
        .map(|&turns| {
            let without_trim = baseline * turns as f64;
            let with_trim = first + steady * (turns - 1) as f64;
            let saved_percent = if without_trim > 0.0 {
                (without_trim - with_trim) / without_trim * 100.0
            } else {
                0.0
            };
            CostProjection {
                turns,
                without_trim,
                with_trim,
                saved_percent,
            }
        })
        .collect();

    let reduction_percent = if pre_trim_tokens > 0 {
        (pre_trim_tokens.saturating_sub(post_trim_tokens)) as f64 / pre_trim_tokens as f64 * 100.0
    } else {
        0.0
    };

    CacheImpactReport {
        model: pricing.display_name.to_string(),
        cache_hit_rate,
        pre_trim_tokens,
        post_trim_tokens,
        reduction_percent,
        baseline_cost_per_turn: baseline,
        first_turn_cost: first,
        steady_state_cost: steady,
        cache_miss_penalty: penalty,
        break_even_turns,
        projections,
    }
}

/// Build a report from an analyzer breakdown.
pub fn cache_impact(
    analysis: &SessionAnalysis,
    pricing: &ModelPricing,
    cache_hit_rate: f64,
) -> CacheImpactReport {
    cache_impact_for_tokens(
        analysis.estimated_tokens,
        estimate_post_trim_tokens(analysis),
        pricing,
        cache_hit_rate,
    )
}

/// Analyze a transcript and model its trim cost impact in one call.
pub fn analyze_cache_impact(
    path: &Path,
    model: &str,
    cache_hit_rate: Option<f64>,
) -> Result<CacheImpactReport> {
    let pricing = pricing_for(model).ok_or_else(|| {
        crate::error::Error::Config(format!(
            "unknown model '{}'; known: {}",
            model,
            KNOWN_MODELS
                .iter()
                .map(|p| p.key)
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    let analysis = crate::analyze::analyze(path)?;
    Ok(cache_impact(
        &analysis,
        pricing,
        cache_hit_rate.unwrap_or(DEFAULT_CACHE_HIT_RATE),
    ))
}
