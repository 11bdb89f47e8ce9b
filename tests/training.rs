mod common;

use ccgbender::config::{ParserConfig, TrainerConfig};
use ccgbender::error::TrainError;
use ccgbender::persist;
use ccgbender::trainer::{FilterMemo, GoldCache};
use ccgbender::{
  AcceptAll, Dataset, Grammar, Lexicon, LinearScorer, Oracle, PackingMode, Scorer, ShiftReduceParser, Trainer,
  UpdateDiscipline, tokenize,
};

/// "book" is ambiguous between book and novel; the data says novel.
fn ambiguous_lexicon(grammar: &Grammar) -> Lexicon {
  let mut src = common::LEXICON.to_string();
  src.push_str("book :- N : λx:e.novel(x) @learned\n");
  Lexicon::parse(&src, &grammar.types).unwrap()
}

fn dataset(grammar: &Grammar) -> Dataset {
  Dataset::parse(
    "the book\tthe(novel)\nthe red book\tthe(red(novel))\n",
    &grammar.types,
  )
  .unwrap()
}

fn trainer_config(discipline: UpdateDiscipline) -> TrainerConfig {
  TrainerConfig {
    epochs: 3,
    discipline,
    ..TrainerConfig::default()
  }
}

fn best_semantics(grammar: &Grammar, lexicon: &Lexicon, scorer: &dyn Scorer, sentence: &str) -> String {
  let parse = ShiftReduceParser::new(grammar, 10).parse(
    &tokenize(sentence),
    lexicon,
    scorer,
    &mut AcceptAll,
    PackingMode::Packed,
  );
  format!("{}", parse.best_derivation().unwrap().category)
}

#[test]
fn test_perceptron_learns_lexical_choice() {
  let grammar = common::grammar();
  let lexicon = ambiguous_lexicon(&grammar);
  let data = dataset(&grammar);
  let scorer = LinearScorer::new(UpdateDiscipline::Serialized, -1.0);

  // ties go to the smaller category, so the untrained model says "book"
  assert_eq!(best_semantics(&grammar, &lexicon, &scorer, "the book"), "NP : the(book)");

  let mut trainer = Trainer::new(
    &grammar,
    &lexicon,
    &scorer,
    ParserConfig::default(),
    trainer_config(UpdateDiscipline::Serialized),
  );
  let stats = trainer.train(&data).unwrap();

  assert_eq!(stats.len(), 3);
  assert_eq!(stats[0].examples, 2);
  assert!(stats[0].updates >= 1);
  assert_eq!(stats[2].correct, 2);
  assert_eq!(stats[2].updates, 0);
  assert_eq!(best_semantics(&grammar, &lexicon, &scorer, "the book"), "NP : the(novel)");

  // both targets have exact derivations, which end up cached
  assert_eq!(trainer.filters().built(), 2);
  assert!(matches!(trainer.filters().get(0), Some(Oracle::Exact(_))));
  assert_eq!(trainer.gold_cache().filled(), 2);
}

#[test]
fn test_lock_free_training() {
  let grammar = common::grammar();
  let lexicon = ambiguous_lexicon(&grammar);
  let data = dataset(&grammar);
  let scorer = LinearScorer::new(UpdateDiscipline::LockFree, -1.0);

  let mut trainer = Trainer::new(
    &grammar,
    &lexicon,
    &scorer,
    ParserConfig::default(),
    trainer_config(UpdateDiscipline::LockFree),
  );
  let stats = trainer.train(&data).unwrap();
  assert_eq!(stats.last().unwrap().correct, 2);
  assert!(scorer.weights().get("LEXORIGIN=learned") > 0.0);
}

#[test]
fn test_pruned_oracle_still_trains() {
  let grammar = common::grammar();
  let lexicon = ambiguous_lexicon(&grammar);
  let data = Dataset::parse("the book\tthe(novel)\n", &grammar.types).unwrap();
  let scorer = LinearScorer::new(UpdateDiscipline::Serialized, -1.0);
  let parser = ParserConfig {
    cells_per_span: Some(1),
    ..ParserConfig::default()
  };

  let mut trainer = Trainer::new(
    &grammar,
    &lexicon,
    &scorer,
    parser,
    trainer_config(UpdateDiscipline::Serialized),
  );
  let stats = trainer.train(&data).unwrap();
  assert!(matches!(trainer.filters().get(0), Some(Oracle::Exact(_))));
  assert_eq!(stats[0].updates, 1);
  assert_eq!(stats[2].correct, 1);
  assert_eq!(best_semantics(&grammar, &lexicon, &scorer, "the book"), "NP : the(novel)");
}

#[test]
fn test_discontiguous_early_update() {
  let grammar = common::grammar();
  let lexicon = ambiguous_lexicon(&grammar);
  let data = Dataset::parse("the red book\tred(novel)\n", &grammar.types).unwrap();
  let scorer = LinearScorer::new(UpdateDiscipline::Serialized, -1.0);
  let parser = ParserConfig {
    beam_width: 1,
    ..ParserConfig::default()
  };
  let config = TrainerConfig {
    epochs: 1,
    discontiguous: true,
    ..TrainerConfig::default()
  };

  let mut trainer = Trainer::new(&grammar, &lexicon, &scorer, parser, config);
  let stats = trainer.train(&data).unwrap();
  let Some(Oracle::Discontiguous(filters)) = trainer.filters().get(0) else {
    panic!("expected discontiguous filters, got {:?}", trainer.filters().get(0));
  };
  assert_eq!(filters.windows(), vec![ccgbender::Span::new(1, 3)]);

  // "book" wins the tie at width 1, so the gold falls off after two of its
  // three ops
  assert_eq!(stats[0].updates, 1);
  assert_eq!(stats[0].early_updates, 1);
  let ratio = stats[0].avg_fail_ratio().unwrap();
  assert!((ratio - 2.0 / 3.0).abs() < 1e-9);
  assert!(scorer.weights().get("LEXORIGIN=learned") > 0.0);
  assert!(scorer.weights().get("LEXORIGIN=fixed") < 0.0);
}

#[test]
fn test_early_update_without_prefix_is_a_no_op() {
  let grammar = common::grammar();
  let lexicon = ambiguous_lexicon(&grammar);
  let data = Dataset::parse("the red book\tred(novel)\n", &grammar.types).unwrap();
  let scorer = LinearScorer::new(UpdateDiscipline::Serialized, -1.0);
  let parser = ParserConfig {
    beam_width: 1,
    ..ParserConfig::default()
  };
  let config = TrainerConfig {
    epochs: 1,
    ..TrainerConfig::default()
  };

  let mut trainer = Trainer::new(&grammar, &lexicon, &scorer, parser, config);
  let stats = trainer.train(&data).unwrap();
  // "the" isn't part of the target, so the filtered beam dies at once
  match trainer.filters().get(0) {
    Some(Oracle::EarlyUpdate(filter)) => assert_eq!(filter.cursor(), 0),
    other => panic!("expected an early-update oracle, got {:?}", other),
  }
  assert_eq!(stats[0].updates, 0);
  assert_eq!(stats[0].early_updates, 0);
  assert_eq!(stats[0].no_violation, 1);
  assert_eq!(stats[0].avg_fail_ratio(), None);
  assert_eq!(scorer.weights().get("LEXORIGIN=learned"), 0.0);
}

#[test]
fn test_long_and_unreachable_examples_are_skipped() {
  let grammar = common::grammar();
  let lexicon = common::lexicon(&grammar);
  let scorer = common::scorer();
  let data = Dataset::parse(
    "the red book\tthe(red(book))\nbook\teat(book)\n",
    &grammar.types,
  )
  .unwrap();

  let parser = ParserConfig {
    max_sentence_length: 2,
    ..ParserConfig::default()
  };
  let config = TrainerConfig {
    epochs: 1,
    early_update: false,
    ..TrainerConfig::default()
  };
  let mut trainer = Trainer::new(&grammar, &lexicon, &scorer, parser, config);
  let stats = trainer.train(&data).unwrap();
  assert_eq!(stats[0].skipped, 1);
  assert_eq!(stats[0].unreachable, 1);
  assert_eq!(stats[0].updates, 0);
}

#[test]
fn test_mismatched_memo_is_fatal() {
  let grammar = common::grammar();
  let lexicon = common::lexicon(&grammar);
  let scorer = common::scorer();
  let data = dataset(&grammar);

  let mut trainer = Trainer::new(
    &grammar,
    &lexicon,
    &scorer,
    ParserConfig::default(),
    TrainerConfig::default(),
  )
  .with_gold_cache(GoldCache::new(5));
  assert!(matches!(trainer.train(&data), Err(TrainError::Invariant(_))));

  let mut trainer = Trainer::new(
    &grammar,
    &lexicon,
    &scorer,
    ParserConfig::default(),
    TrainerConfig::default(),
  )
  .with_filters(FilterMemo::new(1));
  assert!(matches!(trainer.run_epoch(1, &data), Err(TrainError::Invariant(_))));
}

#[test]
fn test_memos_bootstrap_from_disk() {
  let grammar = common::grammar();
  let lexicon = ambiguous_lexicon(&grammar);
  let data = dataset(&grammar);
  let scorer = LinearScorer::new(UpdateDiscipline::Serialized, -1.0);
  let config = TrainerConfig {
    epochs: 1,
    ..TrainerConfig::default()
  };

  let mut trainer = Trainer::new(&grammar, &lexicon, &scorer, ParserConfig::default(), config.clone());
  trainer.train(&data).unwrap();

  let dir = std::env::temp_dir();
  let filters_path = dir.join(format!("ccgbender-filters-{}.json", std::process::id()));
  let gold_path = dir.join(format!("ccgbender-gold-{}.json", std::process::id()));
  persist::save_filters(&filters_path, trainer.filters()).unwrap();
  persist::save_gold_cache(&gold_path, trainer.gold_cache()).unwrap();

  let filters = persist::load_filters(&filters_path).unwrap();
  let gold = persist::load_gold_cache(&gold_path).unwrap();
  assert_eq!(&gold, trainer.gold_cache());
  match (filters.get(0), trainer.filters().get(0)) {
    (Some(Oracle::Exact(loaded)), Some(Oracle::Exact(original))) => {
      assert_eq!(loaded.gold_ops(), original.gold_ops());
      assert_eq!(loaded.target(), original.target());
    }
    other => panic!("unexpected filters {:?}", other),
  }

  let fresh = LinearScorer::new(UpdateDiscipline::Serialized, -1.0);
  let mut resumed = Trainer::new(&grammar, &lexicon, &fresh, ParserConfig::default(), config)
    .with_filters(filters)
    .with_gold_cache(gold);
  let stats = resumed.train(&data).unwrap();
  assert_eq!(stats[0].examples, 2);

  std::fs::remove_file(&filters_path).unwrap();
  std::fs::remove_file(&gold_path).unwrap();
}
