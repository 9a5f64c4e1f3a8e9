//! Dynamic bin-packing batcher.
//!
//! Greedy packer over entities awaiting justification within a chunk,
//! subject to three simultaneous budgets: input tokens (70% of the
//! model context minus the system prompt), output tokens (model max
//! minus a per-entity reserve), and a hard entity cap. A safety margin
//! shrinks every budget before packing. Entities whose prompt exceeds
//! a budget alone go solo; in batch mode bodies are truncated to 10
//! lines and neighbor summaries to 5 neighbors.

use crate::config::{JustifyConfig, ModelParams};

/// Tokens reserved for the system prompt.
const SYSTEM_PROMPT_RESERVE: usize = 500;
/// Output tokens reserved per entity.
const OUTPUT_RESERVE_PER_ENTITY: usize = 200;
/// Input budget as a fraction of the context window.
const INPUT_FRACTION: f64 = 0.70;
/// Body truncation in batch mode, in lines.
pub const BATCH_BODY_LINES: usize = 10;
/// Neighbor summary cap in batch mode.
pub const BATCH_NEIGHBOR_CAP: usize = 5;

/// One entity awaiting packing.
#[derive(Debug, Clone)]
pub struct PackItem {
    /// Entity key.
    pub entity_key: String,
    /// Estimated prompt characters for this entity in batch mode.
    pub prompt_chars: usize,
}

/// A packed batch (or a solo oversized entity).
#[derive(Debug, Clone)]
pub struct PackedBatch {
    /// Entity keys in the batch.
    pub entity_keys: Vec<String>,
    /// Whether the single member exceeded a budget alone.
    pub solo_oversize: bool,
}

/// Derived budgets for one model tier.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    /// Input budget in estimated tokens.
    pub input_tokens: usize,
    /// Output budget in tokens.
    pub output_tokens: usize,
    /// Hard cap on entities per batch.
    pub max_entities: usize,
}

impl Budgets {
    /// Compute budgets for a model with the configured safety margin.
    pub fn for_model(params: &ModelParams, config: &JustifyConfig) -> Self {
        let input = (params.context_tokens as f64 * INPUT_FRACTION) as usize;
        let input = input.saturating_sub(SYSTEM_PROMPT_RESERVE);
        Self {
            input_tokens: (input as f64 * config.safety_margin) as usize,
            output_tokens: (params.max_output_tokens as f64 * config.safety_margin) as usize,
            max_entities: config.max_batch_entities,
        }
    }
}

/// Conservative token estimate from characters.
pub fn estimate_tokens(chars: usize, chars_per_token: f64) -> usize {
    (chars as f64 / chars_per_token).ceil() as usize
}

/// Greedily pack items into batches under the joint budgets.
///
/// Items are taken in the order given (the caller sorts by topology
/// chunk). An item that alone exceeds the input budget, or whose
/// output reserve alone exceeds the output budget, ships solo.
pub fn pack(items: &[PackItem], budgets: Budgets, config: &JustifyConfig) -> Vec<PackedBatch> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for item in items {
        let item_tokens = estimate_tokens(item.prompt_chars, config.chars_per_token);
        let fits_alone = item_tokens <= budgets.input_tokens
            && OUTPUT_RESERVE_PER_ENTITY <= budgets.output_tokens;

        if !fits_alone {
            if !current.is_empty() {
                batches.push(PackedBatch {
                    entity_keys: std::mem::take(&mut current),
                    solo_oversize: false,
                });
                current_tokens = 0;
            }
            batches.push(PackedBatch {
                entity_keys: vec![item.entity_key.clone()],
                solo_oversize: true,
            });
            continue;
        }

        let output_needed = (current.len() + 1) * OUTPUT_RESERVE_PER_ENTITY;
        let would_overflow = current.len() + 1 > budgets.max_entities
            || current_tokens + item_tokens > budgets.input_tokens
            || output_needed > budgets.output_tokens;

        if would_overflow && !current.is_empty() {
            batches.push(PackedBatch {
                entity_keys: std::mem::take(&mut current),
                solo_oversize: false,
            });
            current_tokens = 0;
        }

        current.push(item.entity_key.clone());
        current_tokens += item_tokens;
    }

    if !current.is_empty() {
        batches.push(PackedBatch {
            entity_keys: current,
            solo_oversize: false,
        });
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JustifyConfig {
        JustifyConfig::default()
    }

    fn params(context: usize, output: usize) -> ModelParams {
        ModelParams {
            model: "m".into(),
            context_tokens: context,
            max_output_tokens: output,
        }
    }

    fn items(sizes: &[usize]) -> Vec<PackItem> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &chars)| PackItem {
                entity_key: format!("e{i}"),
                prompt_chars: chars,
            })
            .collect()
    }

    #[test]
    fn test_budgets_apply_margins() {
        let budgets = Budgets::for_model(&params(100_000, 8_192), &config());
        // 70% of 100k minus 500, times 0.85.
        assert_eq!(budgets.input_tokens, ((70_000 - 500) as f64 * 0.85) as usize);
        assert_eq!(budgets.output_tokens, (8_192.0 * 0.85) as usize);
        assert_eq!(budgets.max_entities, 15);
    }

    #[test]
    fn test_hard_entity_cap() {
        let budgets = Budgets::for_model(&params(1_000_000, 64_000), &config());
        let batches = pack(&items(&[100; 40]), budgets, &config());
        assert!(batches.iter().all(|b| b.entity_keys.len() <= 15));
        let total: usize = batches.iter().map(|b| b.entity_keys.len()).sum();
        assert_eq!(total, 40, "every entity packed exactly once");
    }

    #[test]
    fn test_input_budget_splits_batches() {
        // Tiny context: budget fits roughly two 350-char (100-token) items.
        let budgets = Budgets {
            input_tokens: 220,
            output_tokens: 10_000,
            max_entities: 15,
        };
        let batches = pack(&items(&[350, 350, 350]), budgets, &config());
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].entity_keys.len(), 2);
        assert_eq!(batches[1].entity_keys.len(), 1);
    }

    #[test]
    fn test_oversized_item_goes_solo() {
        let budgets = Budgets {
            input_tokens: 100,
            output_tokens: 10_000,
            max_entities: 15,
        };
        // 1000 chars ~ 286 tokens > 100.
        let batches = pack(&items(&[50, 1000, 50]), budgets, &config());
        let solo = batches.iter().find(|b| b.solo_oversize).expect("solo batch");
        assert_eq!(solo.entity_keys, vec!["e1"]);
        // The two small items surround it in their own batches.
        let total: usize = batches.iter().map(|b| b.entity_keys.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_output_budget_limits_batch_size() {
        // Output budget of 900 tokens fits 4 entities at 200 reserve.
        let budgets = Budgets {
            input_tokens: 1_000_000,
            output_tokens: 900,
            max_entities: 15,
        };
        let batches = pack(&items(&[10; 10]), budgets, &config());
        assert!(batches.iter().all(|b| b.entity_keys.len() <= 4));
    }

    #[test]
    fn test_empty_input() {
        let budgets = Budgets::for_model(&params(100_000, 8_192), &config());
        assert!(pack(&[], budgets, &config()).is_empty());
    }
}
