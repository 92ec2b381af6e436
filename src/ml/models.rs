// ============================================================
// Layer 5 — Model Registry
// ============================================================
// Every model this crate can build, as one closed, serialisable
// union of configuration records. A checkpoint directory stores
// one of these as `model_config.json`; rebuilding the module from
// it and loading the recorded weights restores the model.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ml::sequence_encoder::SequenceEncoderConfig;
use crate::ml::set_aggregator::SetAggregatorConfig;
use crate::ml::set_pretrain::SetPretrainerConfig;
use crate::ml::taxonomy_model::{SequenceTaxonomyConfig, SetTaxonomyConfig};
use crate::ml::token_encoder::TokenEncoderConfig;
use crate::ml::token_pretrain::TokenPretrainerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", content = "config", rename_all = "snake_case")]
pub enum ModelConfig {
    TokenEncoder(TokenEncoderConfig),
    TokenPretrainer(TokenPretrainerConfig),
    SequenceEncoder(SequenceEncoderConfig),
    SetAggregator(SetAggregatorConfig),
    SetPretrainer(SetPretrainerConfig),
    SequenceTaxonomy(SequenceTaxonomyConfig),
    SetTaxonomy(SetTaxonomyConfig),
}

impl ModelConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenEncoder(_) => "token_encoder",
            Self::TokenPretrainer(_) => "token_pretrainer",
            Self::SequenceEncoder(_) => "sequence_encoder",
            Self::SetAggregator(_) => "set_aggregator",
            Self::SetPretrainer(_) => "set_pretrainer",
            Self::SequenceTaxonomy(_) => "sequence_taxonomy",
            Self::SetTaxonomy(_) => "set_taxonomy",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::TokenEncoder(c) => c.validate(),
            Self::TokenPretrainer(c) => c.validate(),
            Self::SequenceEncoder(c) => c.validate(),
            Self::SetAggregator(c) => c.validate(),
            Self::SetPretrainer(c) => c.validate(),
            Self::SequenceTaxonomy(c) => c.validate(),
            Self::SetTaxonomy(c) => c.validate(),
        }
    }

    /// The innermost token encoder configuration.
    pub fn token_encoder(&self) -> &TokenEncoderConfig {
        match self {
            Self::TokenEncoder(c) => c,
            Self::TokenPretrainer(c) => &c.base,
            Self::SequenceEncoder(c) => &c.base,
            Self::SetAggregator(c) => &c.sequence_encoder.base,
            Self::SetPretrainer(c) => &c.base.sequence_encoder.base,
            Self::SequenceTaxonomy(c) => &c.encoder.base,
            Self::SetTaxonomy(c) => &c.aggregator.sequence_encoder.base,
        }
    }

    /// Multi-line human readable summary.
    pub fn describe(&self) -> String {
        let base = self.token_encoder();
        let mut lines = vec![
            format!("model:            {}", self.name()),
            format!("sequence_length:  {}", base.sequence_length),
            format!("kmer:             {}", base.kmer),
            format!("embed_dim:        {}", base.embed_dim),
            format!("token stack:      {} x {} heads", base.stack, base.num_heads),
            format!("vocab size:       {}", base.vocab_size()),
        ];
        let set = match self {
            Self::SetAggregator(c) => Some(c),
            Self::SetPretrainer(c) => Some(&c.base),
            Self::SetTaxonomy(c) => Some(&c.aggregator),
            _ => None,
        };
        if let Some(set) = set {
            lines.push(format!("max_set_len:      {}", set.max_set_len));
            lines.push(format!("set stack:        {} x {} heads", set.stack, set.num_heads));
            lines.push(format!("num_induce:       {:?}", set.num_induce));
        }
        let classifier = match self {
            Self::SequenceTaxonomy(c) => Some(&c.classifier),
            Self::SetTaxonomy(c) => Some(&c.classifier),
            _ => None,
        };
        if let Some(classifier) = classifier {
            lines.push(format!("ranks:            {}", classifier.hierarchy.rank_names().join(", ")));
            lines.push(format!("vocab per rank:   {:?}", classifier.hierarchy.vocab_sizes()));
            lines.push(format!("top-down:         {}", classifier.use_top_down_hierarchy));
        }
        lines.join("\n")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::set_aggregator::tests::set_config;
    use crate::ml::taxonomy_head::{tests::hierarchy, HierarchicalClassifierConfig};
    use crate::ml::token_encoder::tests::small_config;

    #[test]
    fn test_nested_configs_round_trip() {
        let config = ModelConfig::SetTaxonomy(SetTaxonomyConfig::new(
            set_config(Some(3)),
            HierarchicalClassifierConfig::new(8, 3, hierarchy()).with_use_top_down_hierarchy(true),
        ));
        let json = config.to_json().unwrap();
        assert!(json.contains("\"model\": \"set_taxonomy\""));

        match ModelConfig::from_json(&json).unwrap() {
            ModelConfig::SetTaxonomy(back) => {
                assert_eq!(back.aggregator.num_induce, Some(3));
                assert_eq!(back.aggregator.sequence_encoder.base.kmer, 3);
                assert_eq!(back.classifier.hierarchy, hierarchy());
            }
            other => panic!("unexpected variant {}", other.name()),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected_on_load() {
        let config = ModelConfig::TokenPretrainer(TokenPretrainerConfig::new(small_config()).with_mask_ratio(2.0));
        let json = config.to_json().unwrap();
        assert!(ModelConfig::from_json(&json).is_err());
    }

    #[test]
    fn test_describe_reports_vocab() {
        let config = ModelConfig::TokenEncoder(TokenEncoderConfig::new(150, 3, 8, 1, 2));
        let text = config.describe();
        assert!(text.contains("token_encoder"));
        assert!(text.contains("vocab size:       65"));
    }
}
