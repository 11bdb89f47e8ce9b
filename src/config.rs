//! TOML configuration for grammars, parser bounds and training.
//!
//! Every section is optional and falls back to the defaults below.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scorer::UpdateDiscipline;
use crate::syntree::PackingMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  #[serde(default)]
  pub types: TypesConfig,
  /// constant name -> type, e.g. `book = "<e,t>"`
  #[serde(default)]
  pub constants: BTreeMap<String, String>,
  #[serde(default)]
  pub grammar: GrammarConfig,
  #[serde(default)]
  pub parser: ParserConfig,
  #[serde(default)]
  pub trainer: TrainerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypesConfig {
  /// (type, parent) pairs, declared in order
  #[serde(default)]
  pub atomic: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GrammarConfig {
  /// Binary rules in registration order
  pub rules: Vec<String>,
  pub roots: Vec<String>,
  pub word_skipping: bool,
  pub max_composition_degree: usize,
  pub type_raising: Vec<TypeRaisingConfig>,
  pub type_shifting: Vec<TypeShiftingConfig>,
}

impl Default for GrammarConfig {
  fn default() -> Self {
    Self {
      rules: [
        "forward-application",
        "backward-application",
        "forward-composition",
        "backward-composition",
        "forward-type-raised-composition",
        "forward-skipping",
        "backward-skipping",
      ]
      .into_iter()
      .map(str::to_string)
      .collect(),
      roots: ["S", "N", "NP", "PP"].into_iter().map(str::to_string).collect(),
      word_skipping: false,
      max_composition_degree: 1,
      type_raising: Vec::new(),
      type_shifting: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeRaisingConfig {
  pub name: String,
  pub arg: String,
  pub target: String,
  pub target_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeShiftingConfig {
  pub name: String,
  pub from: String,
  pub to: String,
  /// a closed term applied to the input semantics
  pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ParserConfig {
  pub beam_width: usize,
  /// Distinct categories kept per chart span. Unset means no pruning.
  pub cells_per_span: Option<usize>,
  pub max_sentence_length: usize,
  pub packing: PackingMode,
  /// Fixed score of every skipped word
  pub skip_penalty: f64,
}

impl Default for ParserConfig {
  fn default() -> Self {
    Self {
      beam_width: 10,
      cells_per_span: None,
      max_sentence_length: 35,
      packing: PackingMode::Packed,
      skip_penalty: -1.0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrainerConfig {
  pub epochs: usize,
  pub learning_rate: f64,
  /// Caps the L2 norm of a single update
  pub max_update_norm: f64,
  pub discipline: UpdateDiscipline,
  pub early_update: bool,
  pub discontiguous: bool,
  pub use_stored_gold: bool,
}

impl Default for TrainerConfig {
  fn default() -> Self {
    Self {
      epochs: 5,
      learning_rate: 1.0,
      max_update_norm: 10.0,
      discipline: UpdateDiscipline::Serialized,
      early_update: true,
      discontiguous: false,
      use_stored_gold: true,
    }
  }
}

impl Config {
  pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
    let config: Config = toml::from_str(src)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Self::from_toml_str(&contents)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.parser.beam_width == 0 {
      return Err(ConfigError::invalid("parser.beam_width", "must be > 0"));
    }
    if self.parser.cells_per_span == Some(0) {
      return Err(ConfigError::invalid("parser.cells_per_span", "must be > 0 when set"));
    }
    if self.parser.max_sentence_length == 0 {
      return Err(ConfigError::invalid("parser.max_sentence_length", "must be > 0"));
    }
    if !self.parser.skip_penalty.is_finite() {
      return Err(ConfigError::invalid("parser.skip_penalty", "must be finite"));
    }
    if self.grammar.roots.is_empty() {
      return Err(ConfigError::invalid("grammar.roots", "must not be empty"));
    }
    if self.grammar.max_composition_degree == 0 {
      return Err(ConfigError::invalid("grammar.max_composition_degree", "must be > 0"));
    }
    if !(self.trainer.learning_rate > 0.0 && self.trainer.learning_rate.is_finite()) {
      return Err(ConfigError::invalid("trainer.learning_rate", "must be a positive number"));
    }
    if !(self.trainer.max_update_norm > 0.0) {
      return Err(ConfigError::invalid("trainer.max_update_norm", "must be > 0"));
    }
    Ok(())
  }
}
