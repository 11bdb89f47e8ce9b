mod common;

use proptest::prelude::*;

use ccgbender::parse_category::parse_term_str;
use ccgbender::rules::combine;
use ccgbender::scorer::{FeatureVector, WeightVector};
use ccgbender::{
  AcceptAll, Category, ChartParser, Grammar, Lexicon, LinearScorer, Oracle, OracleBuilder, PackingMode, Rule, RuleSet,
  ShiftReduceParser, Span, Syntax, Type, TypeRepository, UpdateDiscipline, tokenize,
};

/// A scorer that prefers composition, so the two derivations of
/// "the red book" score differently.
fn biased_scorer(composition: f64, application: f64) -> LinearScorer {
  let weights = WeightVector::new(UpdateDiscipline::Serialized);
  let mut delta = FeatureVector::new();
  delta.add("RULE=forward-composition", composition);
  delta.add("RULE=forward-application", application);
  weights.add_scaled(&delta, 1.0);
  LinearScorer::with_weights(weights, -1.0)
}

#[test]
fn test_packing_equivalence() {
  let grammar = common::grammar();
  let lexicon = common::lexicon(&grammar);
  let scorer = biased_scorer(0.75, -0.25);
  let tokens = tokenize("the red book");
  let parser = ChartParser::new(&grammar);

  let packed = parser.parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  let unpacked = parser.parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Unpacked);
  let pruned = ChartParser::new(&grammar)
    .with_pruning(Some(4))
    .parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);

  let best = packed.group(packed.best().unwrap());
  for other in [&unpacked, &pruned] {
    let other_best = other.group(other.best().unwrap());
    assert_eq!(other_best.category, best.category);
    assert_eq!(other_best.best_score, best.best_score);
  }
  assert_eq!(format!("{}", best.category), "NP : the(red(book))");

  // one packed group, two unpacked ones
  assert_eq!(packed.derivations().len(), 1);
  assert_eq!(packed.num_parses(packed.best().unwrap()), 2);
  assert_eq!(unpacked.derivations().len(), 2);
  assert_eq!(packed.parse_trees(10).len(), 2);
}

#[test]
fn test_pruning_keeps_best_group_per_span() {
  let grammar = common::grammar();
  let mut src = common::LEXICON.to_string();
  src.push_str("book :- N : λx:e.novel(x) @learned\n");
  let lexicon = Lexicon::parse(&src, &grammar.types).unwrap();

  let weights = WeightVector::new(UpdateDiscipline::Serialized);
  let mut delta = FeatureVector::new();
  delta.add("RULE=forward-composition", 0.75);
  delta.add("LEXORIGIN=learned", 1.0);
  weights.add_scaled(&delta, 1.0);
  let scorer = LinearScorer::with_weights(weights, -1.0);
  let tokens = tokenize("the red book");

  let full = ChartParser::new(&grammar).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  let pruned = ChartParser::new(&grammar)
    .with_pruning(Some(1))
    .parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);

  assert_eq!(full.cell(Span::new(2, 3)).len(), 2);
  assert_eq!(full.cell(Span::new(1, 3)).len(), 2);
  assert!(pruned.cells().all(|(_, groups)| groups.len() <= 1));
  let book = pruned.group(pruned.cell(Span::new(2, 3))[0]);
  assert_eq!(format!("{}", book.category), "N : novel");

  let best = full.group(full.best().unwrap());
  let pruned_best = pruned.group(pruned.best().unwrap());
  assert_eq!(format!("{}", best.category), "NP : the(red(novel))");
  assert_eq!(pruned_best.category, best.category);
  assert_eq!(pruned_best.best_score, best.best_score);
  assert_eq!(pruned.derivations().len(), 1);
}

const TRANSITIVE_LEXICON: &str = r#"
john :- NP : john
mary :- NP : mary
likes :- (S\NP)/NP : λy:e.λx:e.likes(y)(x)
"#;

/// "john likes mary" with NP type raising, plus any extra unary rules
fn transitive(extra: Vec<Rule>) -> (Grammar, Lexicon) {
  let mut types = TypeRepository::new();
  for (name, ty) in [("john", "e"), ("mary", "e"), ("likes", "<e,<e,t>>"), ("boss", "<e,e>")] {
    types.declare_constant(name, ty.parse().unwrap()).unwrap();
  }
  let mut rules = RuleSet::standard(1);
  rules.register(Rule::TypeRaising {
    name: "np-raise".to_string(),
    arg: Syntax::np(),
    target: Syntax::s(),
    target_type: Type::truth(),
  });
  for rule in extra {
    rules.register(rule);
  }
  let lexicon = Lexicon::parse(TRANSITIVE_LEXICON, &types).unwrap();
  (Grammar::new(types, rules), lexicon)
}

#[test]
fn test_type_raising_in_both_parsers() {
  let (grammar, lexicon) = transitive(Vec::new());
  let scorer = common::scorer();
  let tokens = tokenize("john likes mary");

  // application twice, raised subject, type-raised composition, and
  // composition of the raised subject
  let chart = ChartParser::new(&grammar).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  assert_eq!(chart.derivations().len(), 1);
  let best = chart.best().unwrap();
  assert_eq!(format!("{}", chart.group(best).category), "S : likes(mary, john)");
  assert_eq!(chart.num_parses(best), 4);
  assert_eq!(chart.cell(Span::new(0, 1)).len(), 2);

  let sr = ShiftReduceParser::new(&grammar, 50);
  let packed = sr.parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  assert_eq!(packed.num_parses(), 4);
  assert_eq!(packed.best_derivation().unwrap().category, chart.group(best).category);
  let unpacked = sr.parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Unpacked);
  assert_eq!(unpacked.completed().len(), 4);

  let target = parse_term_str("likes(mary)(john)", &grammar.types).unwrap();
  let Oracle::Exact(mut filter) = OracleBuilder::new(&grammar).build(&tokens, &target, &lexicon, &scorer) else {
    panic!("expected an exact oracle");
  };
  assert_eq!(filter.parse_trees(), 4);
  let constrained = sr.parse(&tokens, &lexicon, &scorer, &mut filter, PackingMode::Unpacked);
  assert_eq!(constrained.completed().len(), 4);
}

#[test]
fn test_unary_rules_apply_once_per_constituent() {
  let boss = Rule::TypeShifting {
    name: "boss-of".to_string(),
    from: Syntax::np(),
    to: Syntax::np(),
    template: parse_term_str("λx:e.boss(x)", &transitive(Vec::new()).0.types).unwrap(),
  };
  let (grammar, lexicon) = transitive(vec![boss]);
  let scorer = common::scorer();
  let tokens = tokenize("john");

  let chart = ChartParser::new(&grammar).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  let mut roots = chart
    .derivations()
    .iter()
    .map(|&g| chart.group(g).category.to_string())
    .collect::<Vec<_>>();
  roots.sort();
  assert_eq!(roots, vec!["NP : boss(john)", "NP : john"]);
  // raised, shifted and lexical, but nothing built on a unary result
  assert_eq!(chart.cell(Span::new(0, 1)).len(), 3);

  for mode in [PackingMode::Packed, PackingMode::Unpacked] {
    let parse = ShiftReduceParser::new(&grammar, 10).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, mode);
    let mut categories = parse
      .derivations()
      .iter()
      .map(|d| d.category.to_string())
      .collect::<Vec<_>>();
    categories.sort();
    assert_eq!(categories, roots);
    for &state in parse.completed() {
      let unary = parse
        .ops(state)
        .iter()
        .filter(|op| grammar.rules.get(op.rule).is_some_and(|r| r.is_unary()))
        .count();
      assert!(unary <= 1);
    }
  }
}

#[test]
fn test_determinism() {
  let grammar = common::grammar().with_word_skipping(true);
  let lexicon = common::lexicon(&grammar);
  let scorer = biased_scorer(0.5, 0.1);
  let tokens = tokenize("the uh red book");

  let chart = |mode| {
    format!(
      "{}",
      ChartParser::new(&grammar).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, mode)
    )
  };
  let beam = |mode| {
    format!(
      "{}",
      ShiftReduceParser::new(&grammar, 4).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, mode)
    )
  };

  for mode in [PackingMode::Packed, PackingMode::Unpacked] {
    assert_eq!(chart(mode), chart(mode));
    assert_eq!(beam(mode), beam(mode));
  }
}

#[test]
fn test_root_filtering() {
  let lexicon = common::lexicon(&common::grammar());
  let scorer = common::scorer();

  let s_only = common::grammar().with_roots([Syntax::s()]);
  let tokens = tokenize("the book");
  let chart = ChartParser::new(&s_only).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  assert!(chart.derivations().is_empty());
  let beam = ShiftReduceParser::new(&s_only, 10).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Packed);
  assert!(beam.completed().is_empty());

  let np_only = common::grammar().with_roots([Syntax::np()]);
  for sentence in ["the book", "red book", "the red book"] {
    let tokens = tokenize(sentence);
    let chart = ChartParser::new(&np_only).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Unpacked);
    for &g in chart.derivations() {
      assert_eq!(chart.group(g).category.syntax(), &Syntax::np());
    }
    let beam =
      ShiftReduceParser::new(&np_only, 10).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, PackingMode::Unpacked);
    for d in beam.derivations() {
      assert_eq!(d.category.syntax(), &Syntax::np());
    }
  }
}

#[test]
fn test_forward_application_semantics() {
  let grammar = common::grammar();
  let the = Category::parse("NP/N : λf:<e,t>.the(f)", &grammar.types).unwrap();
  let red_book = Category::parse("N : red(book)", &grammar.types).unwrap();

  let result = combine(&the, &red_book, &Rule::ForwardApplication, &grammar.types).unwrap();
  assert_eq!(result.syntax(), &Syntax::np());
  let expected = ccgbender::Term::app(
    the.semantics().unwrap().clone(),
    red_book.semantics().unwrap().clone(),
  )
  .normalize();
  assert_eq!(result.semantics(), Some(&expected));
}

#[test]
fn test_oracle_soundness() {
  let grammar = common::grammar();
  let lexicon = common::lexicon(&grammar);
  let scorer = common::scorer();
  let tokens = tokenize("the red book");
  let target = common::term(&grammar, "the(red(book))");

  let Oracle::Exact(mut filter) = OracleBuilder::new(&grammar).build(&tokens, &target, &lexicon, &scorer) else {
    panic!("expected an exact oracle");
  };
  // both derivations of the target are gold
  assert_eq!(filter.parse_trees(), 2);

  let parse = ShiftReduceParser::new(&grammar, 10).parse(&tokens, &lexicon, &scorer, &mut filter, PackingMode::Unpacked);
  assert_eq!(parse.completed().len(), 2);
  for &state in parse.completed() {
    let tree = parse.tree(&grammar.rules, state).unwrap();
    assert_eq!(tree.category(), filter.category());
    assert_eq!(tree.span(), filter.window());
  }
}

fn syntax_strategy() -> impl Strategy<Value = Syntax> {
  let leaf = prop_oneof![
    Just(Syntax::s()),
    Just(Syntax::n()),
    Just(Syntax::np()),
    Just(Syntax::pp()),
  ];
  leaf.prop_recursive(3, 12, 2, |inner| {
    (inner.clone(), any::<bool>(), inner).prop_map(|(result, forward, arg)| {
      if forward {
        Syntax::forward(result, arg)
      } else {
        Syntax::backward(result, arg)
      }
    })
  })
}

proptest! {
  #[test]
  fn prop_forward_application_yields_result(result in syntax_strategy(), arg in syntax_strategy()) {
    let grammar = common::grammar();
    let functor = Category::syntactic(Syntax::forward(result.clone(), arg.clone()));
    let combined = combine(&functor, &Category::syntactic(arg), &Rule::ForwardApplication, &grammar.types);
    prop_assert_eq!(combined, Some(Category::syntactic(result)));
  }

  #[test]
  fn prop_beam_monotonicity(
    composition in -2.0f64..2.0,
    application in -2.0f64..2.0,
    narrow in 1usize..4,
    extra in 0usize..4,
    packed in any::<bool>(),
  ) {
    let grammar = common::grammar();
    let lexicon = common::lexicon(&grammar);
    let scorer = biased_scorer(composition, application);
    let tokens = tokenize("the red book");
    let mode = if packed { PackingMode::Packed } else { PackingMode::Unpacked };

    let best = |beam: usize| {
      ShiftReduceParser::new(&grammar, beam)
        .parse(&tokens, &lexicon, &scorer, &mut AcceptAll, mode)
        .best_derivation()
        .map(|d| d.score)
    };
    let narrow_score = best(narrow);
    let wide_score = best(narrow + extra);
    prop_assert!(narrow_score.is_some());
    prop_assert!(wide_score >= narrow_score);
  }

  #[test]
  fn prop_parses_are_deterministic(beam in 1usize..6, packed in any::<bool>()) {
    let grammar = common::grammar();
    let lexicon = common::lexicon(&grammar);
    let scorer = biased_scorer(0.3, 0.2);
    let tokens = tokenize("the red book");
    let mode = if packed { PackingMode::Packed } else { PackingMode::Unpacked };
    let run = || {
      let parse = ShiftReduceParser::new(&grammar, beam).parse(&tokens, &lexicon, &scorer, &mut AcceptAll, mode);
      (format!("{}", parse), parse.best().map(|s| parse.ops(s)))
    };
    prop_assert_eq!(run(), run());
  }
}
