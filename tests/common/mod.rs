#![allow(dead_code)]

use ccgbender::{Grammar, Lexicon, LinearScorer, RuleSet, Term, TypeRepository, UpdateDiscipline};

pub const CONSTANTS: &[(&str, &str)] = &[
  ("book", "<e,t>"),
  ("novel", "<e,t>"),
  ("red", "<<e,t>,<e,t>>"),
  ("the", "<<e,t>,e>"),
  ("eat", "<<e,t>,t>"),
];

pub const LEXICON: &str = r#"
// determiners and nouns
book :- N : λx:e.book(x)
the :- NP/N : λf:<e,t>.the(f)
red :- N/N : λf:<e,t>.red(f)
"#;

pub fn types() -> TypeRepository {
  let mut types = TypeRepository::new();
  for (name, ty) in CONSTANTS {
    types.declare_constant(name, ty.parse().unwrap()).unwrap();
  }
  types
}

pub fn grammar() -> Grammar {
  Grammar::new(types(), RuleSet::standard(1))
}

pub fn lexicon(grammar: &Grammar) -> Lexicon {
  Lexicon::parse(LEXICON, &grammar.types).unwrap()
}

pub fn scorer() -> LinearScorer {
  LinearScorer::new(UpdateDiscipline::Serialized, -1.0)
}

pub fn term(grammar: &Grammar, s: &str) -> Term {
  ccgbender::parse_category::parse_term_str(s, &grammar.types).unwrap()
}
