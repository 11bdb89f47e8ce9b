//! Incremental left-to-right beam search over shift, unary-reduce and
//! binary-reduce actions.
//!
//! States live in an arena and point back at their predecessors by index.
//! With packing on, states with the same cursor and stack contents merge
//! into one node that keeps every incoming history, so the states form a DAG.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, trace};

use crate::category::Category;
use crate::error::TrainError;
use crate::grammar::Grammar;
use crate::lexicon::LexicalProvider;
use crate::oracle::{AcceptAll, BeamView, ParsingFilter};
use crate::rules::{RuleId, RuleSet};
use crate::scorer::{Scorer, ScoringContext};
use crate::syntree::{Constituent, DerivationTree, PackingMode, ParsingOp, Span, SynTree, Word};
use crate::utils::by_score_desc;

pub type StateIdx = usize;
type NodeIdx = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackItem {
  pub category: Category,
  pub span: Span,
  /// Whether a unary rule produced this item. Such items don't get another.
  pub unary_applied: bool,
}

/// A persistent stack cell, shared by every state built on top of it.
#[derive(Debug, Clone)]
struct StackNode {
  item: StackItem,
  below: Option<NodeIdx>,
}

/// One way of reaching a state: the predecessor and the op applied to it.
#[derive(Debug, Clone)]
pub struct History {
  pub prev: StateIdx,
  pub op: ParsingOp,
  pub op_score: f64,
  pub score: f64,
}

#[derive(Debug, Clone)]
pub struct DerivationState {
  stack: Option<NodeIdx>,
  pub depth: usize,
  pub cursor: usize,
  /// best score over all histories
  pub score: f64,
  /// Incoming histories, best first. Empty only for the initial state.
  pub histories: Vec<History>,
  pub num_parses: u64,
  pub step: usize,
}

/// A successor state that hasn't survived beam selection yet.
#[derive(Debug)]
struct Candidate {
  stack: Option<NodeIdx>,
  depth: usize,
  cursor: usize,
  history: History,
  num_parses: u64,
  gold: bool,
}

/// Completed states grouped by their root category.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
  pub category: Category,
  /// best first
  pub states: Vec<StateIdx>,
  pub score: f64,
  pub num_parses: u64,
}

/// Where an early-update search first lost the gold prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
  /// number of ops into the gold sequence at which it was pruned (or its
  /// length, if it survived but lost)
  pub fail_at: usize,
  /// true when the gold was pruned or was only a prefix; `gold` and
  /// `predicted` then have the same length
  pub pruned: bool,
  pub gold: Vec<ParsingOp>,
  pub predicted: Vec<ParsingOp>,
}

/// Follows best histories back to the initial state
fn best_history_ops(states: &[DerivationState], state: StateIdx) -> Vec<ParsingOp> {
  let mut ops = Vec::new();
  let mut current = state;
  while let Some(history) = states[current].histories.first() {
    ops.push(history.op.clone());
    current = history.prev;
  }
  ops.reverse();
  ops
}

/// Best score first, then rule registration order, then category
fn completion_order(states: &[DerivationState], a: StateIdx, b: StateIdx) -> std::cmp::Ordering {
  let (ha, hb) = (&states[a].histories[0], &states[b].histories[0]);
  by_score_desc(states[a].score, states[b].score)
    .then_with(|| ha.op.rule.cmp(&hb.op.rule))
    .then_with(|| ha.op.category.cmp(&hb.op.category))
    .then_with(|| a.cmp(&b))
}

struct Search<'a> {
  grammar: &'a Grammar,
  tokens: &'a [String],
  window: Span,
  provider: Box<dyn LexicalProvider + 'a>,
  scorer: &'a dyn Scorer,
  nodes: Vec<StackNode>,
  states: Vec<DerivationState>,
}

impl<'a> Search<'a> {
  fn new(
    grammar: &'a Grammar,
    tokens: &'a [String],
    window: Span,
    lexicon: &'a dyn LexicalProvider,
    scorer: &'a dyn Scorer,
  ) -> Self {
    let mut search = Self {
      grammar,
      tokens,
      window,
      provider: grammar.provider(lexicon),
      scorer,
      nodes: Vec::new(),
      states: Vec::new(),
    };
    search.states.push(DerivationState {
      stack: None,
      depth: 0,
      cursor: window.start,
      score: 0.0,
      histories: Vec::new(),
      num_parses: 1,
      step: 0,
    });
    search
  }

  fn item(&self, node: NodeIdx) -> &StackItem {
    &self.nodes[node].item
  }

  fn push_node(&mut self, item: StackItem, below: Option<NodeIdx>) -> NodeIdx {
    self.nodes.push(StackNode { item, below });
    self.nodes.len() - 1
  }

  /// Stack contents, top first
  fn stack_items(&self, mut node: Option<NodeIdx>) -> Vec<&StackItem> {
    let mut items = Vec::new();
    while let Some(idx) = node {
      items.push(&self.nodes[idx].item);
      node = self.nodes[idx].below;
    }
    items
  }

  fn top(&self, state: StateIdx) -> Option<&StackItem> {
    self.states[state].stack.map(|n| self.item(n))
  }

  /// Does this state finish a derivation of the window? The full sentence
  /// needs a root category; a sub-window accepts anything.
  fn is_complete(&self, state: StateIdx) -> bool {
    let s = &self.states[state];
    if s.cursor != self.window.end || s.depth != 1 {
      return false;
    }
    let full_sentence = self.window.start == 0 && self.window.end == self.tokens.len();
    match self.top(state) {
      Some(top) => !full_sentence || self.grammar.is_root(top.category.syntax()),
      None => false,
    }
  }

  fn ops(&self, state: StateIdx) -> Vec<ParsingOp> {
    best_history_ops(&self.states, state)
  }

  /// Every legal successor of `idx` the filter accepts, in a fixed order:
  /// shifts by entry length, then the unary reduce, then the binary reduce.
  fn expand(
    &mut self,
    idx: StateIdx,
    filter: &mut dyn ParsingFilter,
    gold_op: Option<&ParsingOp>,
    out: &mut Vec<Candidate>,
  ) {
    let grammar: &'a Grammar = self.grammar;
    let tokens: &'a [String] = self.tokens;
    let ctx = ScoringContext { grammar, tokens };
    let types = &grammar.types;
    let rules = &grammar.rules;
    let state = &self.states[idx];
    let (stack, depth, cursor, score, num_parses) = (
      state.stack,
      state.depth,
      state.cursor,
      state.score,
      state.num_parses,
    );

    // (op, stack below the pushed item, new depth, new cursor)
    let mut actions: Vec<(ParsingOp, Option<NodeIdx>, usize, usize)> = Vec::new();

    let max_len = self.provider.max_entry_len().min(self.window.end.saturating_sub(cursor));
    for len in 1..=max_len {
      let span = Span::new(cursor, cursor + len);
      for entry in self.provider.lookup(&tokens[span.start..span.end], span) {
        actions.push((ParsingOp::lexical(span, entry), stack, depth + 1, span.end));
      }
    }

    if let Some(top) = stack {
      let top_node = &self.nodes[top];
      if !top_node.item.unary_applied {
        for (rule, category) in rules.apply_unary(&top_node.item.category, types) {
          let op = ParsingOp::rule(top_node.item.span, rule, category);
          actions.push((op, top_node.below, depth, cursor));
        }
      }

      if let Some(second) = top_node.below {
        let second_node = &self.nodes[second];
        let span = Span::new(second_node.item.span.start, top_node.item.span.end);
        for (rule, category) in
          rules.apply_binary(&second_node.item.category, &top_node.item.category, types)
        {
          let op = ParsingOp::rule(span, rule, category);
          actions.push((op, second_node.below, depth - 1, cursor));
        }
      }
    }

    let mut seen = HashSet::new();
    for (op, below, new_depth, new_cursor) in actions {
      if !seen.insert(op.clone()) || !filter.accept(&op) {
        continue;
      }

      let op_score = self.scorer.score(&op, &ctx);
      let gold = gold_op == Some(&op);
      let item = StackItem {
        category: op.category.clone(),
        span: op.span,
        unary_applied: !op.is_lexical() && rules.get(op.rule).is_some_and(|r| r.is_unary()),
      };
      let node = self.push_node(item, below);
      out.push(Candidate {
        stack: Some(node),
        depth: new_depth,
        cursor: new_cursor,
        history: History {
          prev: idx,
          op,
          op_score,
          score: score + op_score,
        },
        num_parses,
        gold,
      });
    }
  }

  /// Merges (when packed), orders and prunes one step's candidates, moving
  /// the survivors into the arena. Returns the survivors and, for each,
  /// whether a gold candidate went into it.
  fn select(
    &mut self,
    candidates: Vec<Candidate>,
    step: usize,
    mode: PackingMode,
    beam_width: usize,
  ) -> (Vec<StateIdx>, Vec<bool>) {
    let mut merged: Vec<(DerivationState, bool)> = Vec::new();
    let mut by_key: HashMap<(usize, Vec<StackItem>), usize> = HashMap::new();

    for candidate in candidates {
      if mode == PackingMode::Packed {
        let key = (
          candidate.cursor,
          self
            .stack_items(candidate.stack)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>(),
        );
        if let Some(&existing) = by_key.get(&key) {
          let (state, gold) = &mut merged[existing];
          state.num_parses = state.num_parses.saturating_add(candidate.num_parses);
          state.score = state.score.max(candidate.history.score);
          state.histories.push(candidate.history);
          // stable, so equal histories keep arrival order
          state.histories.sort_by(|a, b| {
            by_score_desc(a.score, b.score).then_with(|| a.op.rule.cmp(&b.op.rule))
          });
          *gold |= candidate.gold;
          continue;
        }
        by_key.insert(key, merged.len());
      }

      merged.push((
        DerivationState {
          stack: candidate.stack,
          depth: candidate.depth,
          cursor: candidate.cursor,
          score: candidate.history.score,
          num_parses: candidate.num_parses,
          histories: vec![candidate.history],
          step,
        },
        candidate.gold,
      ));
    }

    merged.sort_by(|(a, _), (b, _)| {
      by_score_desc(a.score, b.score)
        .then_with(|| a.histories[0].op.rule.cmp(&b.histories[0].op.rule))
        .then_with(|| a.histories[0].op.category.cmp(&b.histories[0].op.category))
    });
    merged.truncate(beam_width);

    let mut beam = Vec::with_capacity(merged.len());
    let mut gold = Vec::with_capacity(merged.len());
    for (state, is_gold) in merged {
      self.states.push(state);
      beam.push(self.states.len() - 1);
      gold.push(is_gold);
    }
    (beam, gold)
  }
}

struct BeamSnapshot<'s, 'a> {
  search: &'s Search<'a>,
  beam: &'s [StateIdx],
}

impl BeamView for BeamSnapshot<'_, '_> {
  fn len(&self) -> usize {
    self.beam.len()
  }

  fn ops(&self, idx: usize) -> Vec<ParsingOp> {
    self.search.ops(self.beam[idx])
  }

  fn score(&self, idx: usize) -> f64 {
    self.search.states[self.beam[idx]].score
  }
}

/// The result of a shift-reduce parse.
pub struct ShiftReduceParse {
  tokens: Vec<String>,
  window: Span,
  nodes: Vec<StackNode>,
  states: Vec<DerivationState>,
  completed: Vec<StateIdx>,
  last_beam: Vec<StateIdx>,
  steps: usize,
}

impl ShiftReduceParse {
  fn from_search(search: Search<'_>, completed: Vec<StateIdx>, last_beam: Vec<StateIdx>, steps: usize) -> Self {
    Self {
      tokens: search.tokens.to_vec(),
      window: search.window,
      nodes: search.nodes,
      states: search.states,
      completed,
      last_beam,
      steps,
    }
  }

  pub fn window(&self) -> Span {
    self.window
  }

  pub fn steps(&self) -> usize {
    self.steps
  }

  pub fn state(&self, idx: StateIdx) -> &DerivationState {
    &self.states[idx]
  }

  pub fn top(&self, idx: StateIdx) -> Option<&StackItem> {
    self.states[idx].stack.map(|n| &self.nodes[n].item)
  }

  /// Completed states, best first
  pub fn completed(&self) -> &[StateIdx] {
    &self.completed
  }

  /// The deepest non-empty beam the search reached
  pub fn max_scoring_states(&self) -> &[StateIdx] {
    &self.last_beam
  }

  pub fn best(&self) -> Option<StateIdx> {
    self.completed.first().copied()
  }

  /// Completed states grouped by root category, best first
  pub fn derivations(&self) -> Vec<Derivation> {
    let mut derivations: Vec<Derivation> = Vec::new();
    for &idx in self.completed.iter() {
      let Some(top) = self.top(idx) else {
        continue;
      };
      let state = &self.states[idx];
      match derivations.iter_mut().find(|d| d.category == top.category) {
        Some(d) => {
          d.states.push(idx);
          d.num_parses = d.num_parses.saturating_add(state.num_parses);
        }
        None => derivations.push(Derivation {
          category: top.category.clone(),
          states: vec![idx],
          score: state.score,
          num_parses: state.num_parses,
        }),
      }
    }
    derivations
  }

  pub fn best_derivation(&self) -> Option<Derivation> {
    self.derivations().into_iter().next()
  }

  /// Total derivations across every completed state
  pub fn num_parses(&self) -> u64 {
    self
      .completed
      .iter()
      .fold(0u64, |acc, &idx| acc.saturating_add(self.states[idx].num_parses))
  }

  /// The op sequence of the best history leading to `state`
  pub fn ops(&self, state: StateIdx) -> Vec<ParsingOp> {
    best_history_ops(&self.states, state)
  }

  pub fn tree(&self, rules: &RuleSet, state: StateIdx) -> Option<DerivationTree> {
    replay(&self.tokens, rules, &self.ops(state))
  }
}

impl fmt::Display for ShiftReduceParse {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "//** window {} after {} steps, {} completed",
      self.window,
      self.steps,
      self.completed.len()
    )?;
    for &idx in self.completed.iter() {
      let state = &self.states[idx];
      if let Some(top) = self.top(idx) {
        writeln!(f, "{}: {} ({}, {} parses)", top.span, top.category, state.score, state.num_parses)?;
      }
    }
    Ok(())
  }
}

/// Rebuilds a derivation tree from a bottom-up op sequence. None if the ops
/// don't form exactly one tree.
pub fn replay(tokens: &[String], rules: &RuleSet, ops: &[ParsingOp]) -> Option<DerivationTree> {
  let mut stack: Vec<DerivationTree> = Vec::new();
  for op in ops {
    let constituent = Constituent {
      value: op.category.clone(),
      span: op.span,
    };
    let arity = match op.rule {
      RuleId::Lexical => 0,
      id => rules.get(id)?.arity(),
    };
    let children = match arity {
      0 => (op.span.start..op.span.end)
        .map(|i| {
          tokens.get(i).map(|w| {
            SynTree::Leaf(Word {
              value: w.clone(),
              span: Span::new(i, i + 1),
            })
          })
        })
        .collect::<Option<Vec<_>>>()?,
      1 => vec![stack.pop()?],
      _ => {
        let right = stack.pop()?;
        let left = stack.pop()?;
        vec![left, right]
      }
    };
    stack.push(SynTree::Branch(constituent, children));
  }

  if stack.len() == 1 { stack.pop() } else { None }
}

/// Beam-search shift-reduce parser.
pub struct ShiftReduceParser<'g> {
  grammar: &'g Grammar,
  beam_width: usize,
}

impl<'g> ShiftReduceParser<'g> {
  pub fn new(grammar: &'g Grammar, beam_width: usize) -> Self {
    Self {
      grammar,
      beam_width: beam_width.max(1),
    }
  }

  pub fn beam_width(&self) -> usize {
    self.beam_width
  }

  pub fn parse(
    &self,
    tokens: &[String],
    lexicon: &dyn LexicalProvider,
    scorer: &dyn Scorer,
    filter: &mut dyn ParsingFilter,
    mode: PackingMode,
  ) -> ShiftReduceParse {
    self.parse_window(tokens, Span::new(0, tokens.len()), lexicon, scorer, filter, mode)
  }

  /// Parses only `window` of the sentence. Spans stay absolute. Derivations
  /// of a strict sub-window may have any category.
  pub fn parse_window(
    &self,
    tokens: &[String],
    window: Span,
    lexicon: &dyn LexicalProvider,
    scorer: &dyn Scorer,
    filter: &mut dyn ParsingFilter,
    mode: PackingMode,
  ) -> ShiftReduceParse {
    let window = Span::new(window.start.min(tokens.len()), window.end.min(tokens.len()));
    let mut search = Search::new(self.grammar, tokens, window, lexicon, scorer);
    let mut beam = vec![0];
    let mut last_beam = beam.clone();
    let mut completed = Vec::new();
    let mut step = 0;

    filter.observe_beam(
      step,
      &BeamSnapshot {
        search: &search,
        beam: &beam,
      },
    );

    while !beam.is_empty() {
      step += 1;
      let mut candidates = Vec::new();
      for &idx in beam.iter() {
        search.expand(idx, filter, None, &mut candidates);
      }
      trace!(step, candidates = candidates.len(), "expanded beam");

      let (next, _) = search.select(candidates, step, mode, self.beam_width);
      completed.extend(next.iter().copied().filter(|&idx| search.is_complete(idx)));
      filter.observe_beam(
        step,
        &BeamSnapshot {
          search: &search,
          beam: &next,
        },
      );

      if !next.is_empty() {
        last_beam = next.clone();
      }
      beam = next;
    }

    let states = &search.states;
    completed.sort_by(|&a, &b| completion_order(states, a, b));

    debug!(
      window = %window,
      steps = step,
      completed = completed.len(),
      "shift-reduce parse finished"
    );
    ShiftReduceParse::from_search(search, completed, last_beam, step)
  }

  /// Runs an unconstrained, unpacked search alongside a gold op sequence and
  /// reports the first point where the gold falls out of the beam (early
  /// update), or where it survives but another derivation outscores it.
  ///
  /// `complete` says whether `gold` is a whole derivation of `window` or only
  /// a prefix. Returns Ok(None) when the gold wins.
  pub fn find_violation(
    &self,
    tokens: &[String],
    window: Span,
    gold: &[ParsingOp],
    complete: bool,
    lexicon: &dyn LexicalProvider,
    scorer: &dyn Scorer,
  ) -> Result<Option<Violation>, TrainError> {
    if gold.is_empty() {
      return Ok(None);
    }
    if let Some(op) = gold.iter().find(|op| !window.contains(op.span)) {
      return Err(TrainError::invariant(format!(
        "gold op {} lies outside window {}",
        op, window
      )));
    }

    let mut search = Search::new(self.grammar, tokens, window, lexicon, scorer);
    let mut filter = AcceptAll;
    let mut beam = vec![0];
    let mut gold_state = Some(0);
    let mut completed = Vec::new();
    let mut step = 0;

    while !beam.is_empty() {
      let gold_op = gold_state.and(gold.get(step));
      step += 1;

      let mut candidates = Vec::new();
      for &idx in beam.iter() {
        let expected = if Some(idx) == gold_state { gold_op } else { None };
        search.expand(idx, &mut filter, expected, &mut candidates);
      }

      if gold_op.is_some() {
        // expand() yields each op at most once per state
        let matched = candidates.iter().filter(|c| c.gold).count();
        debug_assert!(matched <= 1);
        if matched == 0 {
          return Err(TrainError::invariant(format!(
            "gold op {} at step {} is not a legal action",
            gold[step - 1],
            step
          )));
        }
      }

      let (next, gold_flags) = search.select(candidates, step, PackingMode::Unpacked, self.beam_width);
      completed.extend(next.iter().copied().filter(|&idx| search.is_complete(idx)));

      if gold_op.is_some() {
        gold_state = next
          .iter()
          .zip(gold_flags.iter())
          .find(|(_, is_gold)| **is_gold)
          .map(|(&idx, _)| idx);

        match gold_state {
          None => {
            // fell off the beam: compare prefixes of equal length
            let predicted = search.ops(next[0]);
            return Ok(Some(Violation {
              fail_at: step,
              pruned: true,
              gold: gold[..step].to_vec(),
              predicted,
            }));
          }
          Some(idx) if step == gold.len() && !complete => {
            if next[0] == idx {
              return Ok(None);
            }
            return Ok(Some(Violation {
              fail_at: step,
              pruned: true,
              gold: gold.to_vec(),
              predicted: search.ops(next[0]),
            }));
          }
          Some(_) => {}
        }
      }
      beam = next;
    }

    // the gold survived to the end; it still loses if a different
    // derivation completed with a higher score
    let states = &search.states;
    let best = completed.iter().copied().min_by(|&a, &b| completion_order(states, a, b));

    match best {
      Some(best) => {
        let predicted = search.ops(best);
        if predicted == gold {
          Ok(None)
        } else {
          Ok(Some(Violation {
            fail_at: gold.len(),
            pruned: false,
            gold: gold.to_vec(),
            predicted,
          }))
        }
      }
      None => Err(TrainError::invariant(format!(
        "gold derivation of {} ops survived but never completed",
        gold.len()
      ))),
    }
  }
}
