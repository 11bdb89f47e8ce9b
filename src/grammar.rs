use std::collections::BTreeSet;
use std::fmt;

use crate::config::Config;
use crate::error::ConfigError;
use crate::lexicon::{LexicalEntry, LexicalProvider, WordSkipping};
use crate::parse_category::parse_term_str;
use crate::rules::{Rule, RuleSet};
use crate::semantics::{Identity, Underspecify};
use crate::syntax::Syntax;
use crate::syntree::Span;
use crate::types::{Type, TypeRepository};

/// Everything a parse needs besides the lexicon and the weights. Built once
/// and passed by reference; never mutated while parsing.
#[derive(Debug)]
pub struct Grammar {
  pub types: TypeRepository,
  pub rules: RuleSet,
  roots: BTreeSet<Syntax>,
  word_skipping: bool,
  underspecify: Box<dyn Underspecify>,
}

impl Grammar {
  /// A grammar accepting S, N, NP and PP at the root, without word skipping.
  pub fn new(types: TypeRepository, rules: RuleSet) -> Self {
    Self {
      types,
      rules,
      roots: [Syntax::s(), Syntax::n(), Syntax::np(), Syntax::pp()]
        .into_iter()
        .collect(),
      word_skipping: false,
      underspecify: Box::new(Identity),
    }
  }

  pub fn with_roots(mut self, roots: impl IntoIterator<Item = Syntax>) -> Self {
    self.roots = roots.into_iter().collect();
    self
  }

  pub fn with_word_skipping(mut self, enabled: bool) -> Self {
    self.word_skipping = enabled;
    self
  }

  pub fn with_underspecify(mut self, underspecify: Box<dyn Underspecify>) -> Self {
    self.underspecify = underspecify;
    self
  }

  /// Builds the type repository and rule set a config describes. Unknown
  /// types and rule names fail here, before any parsing.
  pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
    let mut types = TypeRepository::new();
    for (name, parent) in config.types.atomic.iter() {
      types.add_atomic(name, Some(parent))?;
    }
    for (name, ty) in config.constants.iter() {
      let ty: Type = ty
        .parse()
        .map_err(|e| ConfigError::invalid(format!("constants.{}", name), format!("{}", e)))?;
      types.declare_constant(name, ty)?;
    }

    let grammar_config = &config.grammar;
    let mut rules = RuleSet::new();
    for name in grammar_config.rules.iter() {
      rules.register(Rule::from_name(name, grammar_config.max_composition_degree)?);
    }

    for raising in grammar_config.type_raising.iter() {
      let field = || format!("grammar.type_raising.{}", raising.name);
      let invalid = |e: crate::Err| ConfigError::invalid(field(), e.to_string());
      let arg: Syntax = raising.arg.parse().map_err(invalid)?;
      let target: Syntax = raising.target.parse().map_err(invalid)?;
      let target_type: Type = raising.target_type.parse().map_err(invalid)?;
      types.validate(&target_type)?;
      rules.register(Rule::TypeRaising {
        name: raising.name.clone(),
        arg,
        target,
        target_type,
      });
    }

    for shifting in grammar_config.type_shifting.iter() {
      let field = || format!("grammar.type_shifting.{}", shifting.name);
      let invalid = |e: crate::Err| ConfigError::invalid(field(), e.to_string());
      let from: Syntax = shifting.from.parse().map_err(invalid)?;
      let to: Syntax = shifting.to.parse().map_err(invalid)?;
      let template = parse_term_str(&shifting.template, &types).map_err(invalid)?;
      rules.register(Rule::TypeShifting {
        name: shifting.name.clone(),
        from,
        to,
        template,
      });
    }

    let mut roots = BTreeSet::new();
    for root in grammar_config.roots.iter() {
      let syntax: Syntax = root
        .parse()
        .map_err(|e: crate::Err| ConfigError::invalid("grammar.roots", e.to_string()))?;
      roots.insert(syntax);
    }

    Ok(
      Self::new(types, rules)
        .with_roots(roots)
        .with_word_skipping(grammar_config.word_skipping),
    )
  }

  pub fn is_root(&self, syntax: &Syntax) -> bool {
    self.roots.contains(syntax)
  }

  pub fn roots(&self) -> impl Iterator<Item = &Syntax> {
    self.roots.iter()
  }

  pub fn word_skipping(&self) -> bool {
    self.word_skipping
  }

  pub fn underspecify(&self) -> &dyn Underspecify {
    self.underspecify.as_ref()
  }

  /// The lexicon as the parsers see it: wrapped with skip entries when word
  /// skipping is on.
  pub fn provider<'a>(&self, lexicon: &'a dyn LexicalProvider) -> Box<dyn LexicalProvider + 'a> {
    if self.word_skipping {
      Box::new(WordSkipping::new(lexicon))
    } else {
      Box::new(Passthrough(lexicon))
    }
  }
}

struct Passthrough<'a>(&'a dyn LexicalProvider);

impl LexicalProvider for Passthrough<'_> {
  fn lookup(&self, tokens: &[String], span: Span) -> Vec<LexicalEntry> {
    self.0.lookup(tokens, span)
  }

  fn max_entry_len(&self) -> usize {
    self.0.max_entry_len()
  }
}

impl fmt::Display for Grammar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "//** roots:")?;
    for root in self.roots.iter() {
      write!(f, " {}", root)?;
    }
    writeln!(f)?;
    writeln!(f, "//** word skipping: {}", self.word_skipping)?;
    for (name, ty) in self.types.constants() {
      writeln!(f, "//** {}: {}", name, ty)?;
    }
    write!(f, "{}", self.rules)
  }
}
