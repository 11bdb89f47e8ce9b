#[macro_use]
extern crate lazy_static;

pub mod category;
pub mod chart;
pub mod config;
pub mod error;
pub mod grammar;
pub mod lexicon;
pub mod oracle;
pub mod parse_category;
pub mod persist;
pub mod rules;
pub mod scorer;
pub mod semantics;
pub mod shiftreduce;
pub mod syntax;
pub mod syntree;
pub mod trainer;
pub mod types;
pub mod utils;

pub use crate::category::Category;
pub use crate::chart::{Chart, ChartParser};
pub use crate::config::Config;
pub use crate::grammar::Grammar;
pub use crate::lexicon::{LexicalEntry, LexicalProvider, Lexicon, Origin};
pub use crate::oracle::{AcceptAll, Oracle, OracleBuilder, OracleFilter, ParsingFilter};
pub use crate::rules::{Rule, RuleId, RuleSet};
pub use crate::scorer::{LinearScorer, Scorer, UpdateDiscipline};
pub use crate::semantics::Term;
pub use crate::shiftreduce::{ShiftReduceParse, ShiftReduceParser};
pub use crate::syntax::Syntax;
pub use crate::syntree::{DerivationTree, PackingMode, ParsingOp, Span};
pub use crate::trainer::{Dataset, Trainer};
pub use crate::types::{Type, TypeRepository};
pub use crate::utils::Err;

/// Splits a sentence on whitespace.
pub fn tokenize(sentence: &str) -> Vec<String> {
  sentence.split_whitespace().map(str::to_string).collect()
}

#[test]
fn test_chart_and_beam_agree() {
  let mut types = TypeRepository::new();
  types.declare_constant("book", "<e,t>".parse().unwrap()).unwrap();
  types.declare_constant("the", "<<e,t>,e>".parse().unwrap()).unwrap();
  let lexicon: Lexicon = Lexicon::parse(
    r#"
    book :- N : λx:e.book(x)
    the :- NP/N : λf:<e,t>.the(f)
    "#,
    &types,
  )
  .unwrap();
  let grammar = Grammar::new(types, RuleSet::standard(1));
  let scorer = LinearScorer::new(UpdateDiscipline::Serialized, -1.0);
  let tokens = tokenize("the book");

  let chart = ChartParser::new(&grammar).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  let best = chart.best().unwrap();
  assert_eq!(format!("{}", chart.group(best).category), "NP : the(book)");

  let beam = ShiftReduceParser::new(&grammar, 1).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  let derivation = beam.best_derivation().unwrap();
  assert_eq!(derivation.category, chart.group(best).category);
  assert_eq!(derivation.score, chart.group(best).best_score);
}
