//! Exhaustive bottom-up CKY-style chart parsing.
//!
//! Each span's cell holds groups: one per distinct category when packed, one
//! per step when unpacked. Groups and steps live in arenas and refer to their
//! children by index.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, trace};

use crate::category::Category;
use crate::grammar::Grammar;
use crate::lexicon::LexicalProvider;
use crate::oracle::ParsingFilter;
use crate::scorer::{Scorer, ScoringContext};
use crate::syntree::{Constituent, DerivationTree, PackingMode, ParsingOp, Span, SynTree, Word};
use crate::utils::{by_score_desc, combinations};

pub type GroupIdx = usize;
pub type StepIdx = usize;

/// One way of building a group's category.
#[derive(Debug, Clone)]
pub struct ParseStep {
  pub op: ParsingOp,
  /// Zero children for lexical steps, one for unary, two for binary.
  pub children: Vec<GroupIdx>,
  pub op_score: f64,
  /// op score plus the best scores of the children
  pub score: f64,
  /// Unary steps only build on their child's non-unary steps
  pub unary: bool,
}

/// All steps in one cell that produce the same category.
#[derive(Debug, Clone)]
pub struct Group {
  pub span: Span,
  pub category: Category,
  pub steps: Vec<StepIdx>,
  pub best: StepIdx,
  pub best_score: f64,
  /// best step that isn't unary, if any
  pub base_best: Option<StepIdx>,
  pub base_best_score: f64,
}

#[derive(Debug)]
pub struct Chart {
  tokens: Vec<String>,
  mode: PackingMode,
  groups: Vec<Group>,
  steps: Vec<ParseStep>,
  cells: BTreeMap<Span, Vec<GroupIdx>>,
  derivations: Vec<GroupIdx>,
}

impl Chart {
  pub fn tokens(&self) -> &[String] {
    &self.tokens
  }

  pub fn mode(&self) -> PackingMode {
    self.mode
  }

  /// Groups kept for `span`, best first
  pub fn cell(&self, span: Span) -> &[GroupIdx] {
    self.cells.get(&span).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn cells(&self) -> impl Iterator<Item = (Span, &[GroupIdx])> {
    self.cells.iter().map(|(span, groups)| (*span, groups.as_slice()))
  }

  pub fn group(&self, idx: GroupIdx) -> &Group {
    &self.groups[idx]
  }

  pub fn step(&self, idx: StepIdx) -> &ParseStep {
    &self.steps[idx]
  }

  pub fn num_groups(&self) -> usize {
    self.groups.len()
  }

  pub fn num_steps(&self) -> usize {
    self.steps.len()
  }

  /// Full-span groups with a root category, best first
  pub fn derivations(&self) -> &[GroupIdx] {
    &self.derivations
  }

  pub fn best(&self) -> Option<GroupIdx> {
    self.derivations.first().copied()
  }

  fn steps_of(&self, group: GroupIdx, base_only: bool) -> impl Iterator<Item = StepIdx> + '_ {
    self.groups[group]
      .steps
      .iter()
      .copied()
      .filter(move |&s| !base_only || !self.steps[s].unary)
  }

  fn best_step(&self, group: GroupIdx, base_only: bool) -> Option<StepIdx> {
    let g = &self.groups[group];
    if base_only { g.base_best } else { Some(g.best) }
  }

  /// The ops of the group's best derivation, children before parents
  pub fn best_ops(&self, group: GroupIdx) -> Vec<ParsingOp> {
    let mut ops = Vec::new();
    self.collect_best_ops(group, false, &mut ops);
    ops
  }

  fn collect_best_ops(&self, group: GroupIdx, base_only: bool, ops: &mut Vec<ParsingOp>) {
    let Some(step) = self.best_step(group, base_only) else {
      return;
    };
    let step = &self.steps[step];
    for &child in step.children.iter() {
      self.collect_best_ops(child, step.unary, ops);
    }
    ops.push(step.op.clone());
  }

  pub fn best_tree(&self, group: GroupIdx) -> Option<DerivationTree> {
    self.best_tree_of(group, false)
  }

  fn best_tree_of(&self, group: GroupIdx, base_only: bool) -> Option<DerivationTree> {
    let step = &self.steps[self.best_step(group, base_only)?];
    let children = if step.children.is_empty() {
      self.leaves(step.op.span)
    } else {
      step
        .children
        .iter()
        .map(|&c| self.best_tree_of(c, step.unary))
        .collect::<Option<Vec<_>>>()?
    };
    Some(self.branch(step, children))
  }

  fn leaves(&self, span: Span) -> Vec<DerivationTree> {
    (span.start..span.end)
      .map(|i| {
        SynTree::Leaf(Word {
          value: self.tokens[i].clone(),
          span: Span::new(i, i + 1),
        })
      })
      .collect()
  }

  fn branch(&self, step: &ParseStep, children: Vec<DerivationTree>) -> DerivationTree {
    SynTree::Branch(
      Constituent {
        value: step.op.category.clone(),
        span: step.op.span,
      },
      children,
    )
  }

  /// Every derivation of a group. Exponential in the worst case.
  pub fn trees(&self, group: GroupIdx) -> Vec<DerivationTree> {
    self.trees_of(group, false)
  }

  fn trees_of(&self, group: GroupIdx, base_only: bool) -> Vec<DerivationTree> {
    self
      .steps_of(group, base_only)
      .flat_map(|s| {
        let step = &self.steps[s];
        if step.children.is_empty() {
          return vec![self.branch(step, self.leaves(step.op.span))];
        }
        let options = step
          .children
          .iter()
          .map(|&c| self.trees_of(c, step.unary))
          .collect::<Vec<_>>();
        combinations(&options)
          .into_iter()
          .map(|children| self.branch(step, children))
          .collect()
      })
      .collect()
  }

  /// Trees of every root derivation, best group first, at most `limit`
  pub fn parse_trees(&self, limit: usize) -> Vec<DerivationTree> {
    self
      .derivations
      .iter()
      .flat_map(|&g| self.trees(g))
      .take(limit)
      .collect()
  }

  /// How many derivations a group packs
  pub fn num_parses(&self, group: GroupIdx) -> u64 {
    self.count(group, false, &mut HashMap::new())
  }

  fn count(&self, group: GroupIdx, base_only: bool, memo: &mut HashMap<(GroupIdx, bool), u64>) -> u64 {
    if let Some(&n) = memo.get(&(group, base_only)) {
      return n;
    }
    let steps = self.steps_of(group, base_only).collect::<Vec<_>>();
    let mut total: u64 = 0;
    for s in steps {
      let step = &self.steps[s];
      let mut product: u64 = 1;
      for &child in step.children.iter() {
        product = product.saturating_mul(self.count(child, step.unary, memo));
      }
      total = total.saturating_add(product);
    }
    memo.insert((group, base_only), total);
    total
  }

  /// The ops of every derivation of a group
  pub fn ops_under(&self, group: GroupIdx) -> BTreeSet<ParsingOp> {
    let mut ops = BTreeSet::new();
    let mut visited = BTreeSet::new();
    self.collect_ops(group, false, &mut ops, &mut visited);
    ops
  }

  fn collect_ops(
    &self,
    group: GroupIdx,
    base_only: bool,
    ops: &mut BTreeSet<ParsingOp>,
    visited: &mut BTreeSet<(GroupIdx, bool)>,
  ) {
    if !visited.insert((group, base_only)) {
      return;
    }
    let steps = self.steps_of(group, base_only).collect::<Vec<_>>();
    for s in steps {
      let step = &self.steps[s];
      ops.insert(step.op.clone());
      for &child in step.children.iter() {
        self.collect_ops(child, step.unary, ops, visited);
      }
    }
  }

  /// Every op in every kept cell
  pub fn all_ops(&self) -> BTreeSet<ParsingOp> {
    self
      .cells
      .values()
      .flatten()
      .flat_map(|&g| self.groups[g].steps.iter())
      .map(|&s| self.steps[s].op.clone())
      .collect()
  }
}

impl fmt::Display for Chart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (span, groups) in self.cells.iter() {
      writeln!(f, "Cell {}:", span)?;
      for &g in groups.iter() {
        let group = &self.groups[g];
        writeln!(
          f,
          "  {} ({}, {} steps)",
          group.category,
          group.best_score,
          group.steps.len()
        )?;
      }
    }
    Ok(())
  }
}

/// Builds one cell, grouping steps by category when packed.
struct CellBuilder {
  span: Span,
  groups: Vec<GroupIdx>,
  by_category: HashMap<Category, GroupIdx>,
}

impl CellBuilder {
  fn new(span: Span) -> Self {
    Self {
      span,
      groups: Vec::new(),
      by_category: HashMap::new(),
    }
  }

  fn add(&mut self, chart: &mut Chart, step: ParseStep) {
    let existing = match chart.mode {
      PackingMode::Packed => self.by_category.get(&step.op.category).copied(),
      PackingMode::Unpacked => None,
    };

    if let Some(g) = existing {
      let duplicate = chart.groups[g].steps.iter().any(|&s| {
        let other = &chart.steps[s];
        other.op == step.op && other.children == step.children
      });
      if duplicate {
        return;
      }
    }

    chart.steps.push(step);
    let s = chart.steps.len() - 1;
    let step = &chart.steps[s];

    match existing {
      Some(g) => {
        let group = &mut chart.groups[g];
        group.steps.push(s);
        let best_rule = chart.steps[group.best].op.rule;
        if by_score_desc(step.score, group.best_score)
          .then_with(|| step.op.rule.cmp(&best_rule))
          .is_lt()
        {
          group.best = s;
          group.best_score = step.score;
        }
        if !step.unary && group.base_best.is_none_or(|_| step.score > group.base_best_score) {
          group.base_best = Some(s);
          group.base_best_score = step.score;
        }
      }
      None => {
        let group = Group {
          span: self.span,
          category: step.op.category.clone(),
          steps: vec![s],
          best: s,
          best_score: step.score,
          base_best: (!step.unary).then_some(s),
          base_best_score: if step.unary { f64::NEG_INFINITY } else { step.score },
        };
        chart.groups.push(group);
        let g = chart.groups.len() - 1;
        self.groups.push(g);
        if chart.mode == PackingMode::Packed {
          self.by_category.insert(chart.groups[g].category.clone(), g);
        }
      }
    }
  }

  /// Orders the cell best first and keeps the top `limit` groups
  fn finish(mut self, chart: &Chart, limit: Option<usize>) -> Vec<GroupIdx> {
    self.groups.sort_by(|&a, &b| {
      let (ga, gb) = (&chart.groups[a], &chart.groups[b]);
      by_score_desc(ga.best_score, gb.best_score)
        .then_with(|| chart.steps[ga.best].op.rule.cmp(&chart.steps[gb.best].op.rule))
        .then_with(|| ga.category.cmp(&gb.category))
    });
    if let Some(limit) = limit {
      self.groups.truncate(limit);
    }
    self.groups
  }
}

/// Exhaustive bottom-up parser over the shared rule algebra.
pub struct ChartParser<'g> {
  grammar: &'g Grammar,
  cells_per_span: Option<usize>,
}

impl<'g> ChartParser<'g> {
  pub fn new(grammar: &'g Grammar) -> Self {
    Self {
      grammar,
      cells_per_span: None,
    }
  }

  /// Keep at most `k` groups per span
  pub fn with_pruning(mut self, cells_per_span: Option<usize>) -> Self {
    self.cells_per_span = cells_per_span;
    self
  }

  pub fn parse(
    &self,
    tokens: &[String],
    lexicon: &dyn LexicalProvider,
    scorer: &dyn Scorer,
    filter: &mut dyn ParsingFilter,
    mode: PackingMode,
  ) -> Chart {
    let grammar = self.grammar;
    let types = &grammar.types;
    let rules = &grammar.rules;
    let provider = grammar.provider(lexicon);
    let ctx = ScoringContext { grammar, tokens };
    let n = tokens.len();

    let mut chart = Chart {
      tokens: tokens.to_vec(),
      mode,
      groups: Vec::new(),
      steps: Vec::new(),
      cells: BTreeMap::new(),
      derivations: Vec::new(),
    };

    for len in 1..=n {
      for start in 0..=(n - len) {
        let span = Span::new(start, start + len);
        let mut cell = CellBuilder::new(span);

        if len <= provider.max_entry_len() {
          for entry in provider.lookup(&tokens[span.start..span.end], span) {
            let op = ParsingOp::lexical(span, entry);
            if !filter.accept(&op) {
              continue;
            }
            let op_score = scorer.score(&op, &ctx);
            let step = ParseStep {
              op,
              children: Vec::new(),
              op_score,
              score: op_score,
              unary: false,
            };
            cell.add(&mut chart, step);
          }
        }

        for split in (start + 1)..span.end {
          let left_cell = chart.cell(Span::new(start, split)).to_vec();
          let right_cell = chart.cell(Span::new(split, span.end)).to_vec();
          for &l in left_cell.iter() {
            for &r in right_cell.iter() {
              let (left, right) = (&chart.groups[l], &chart.groups[r]);
              let children_score = left.best_score + right.best_score;
              for (rule, category) in rules.apply_binary(&left.category, &right.category, types) {
                let op = ParsingOp::rule(span, rule, category);
                if !filter.accept(&op) {
                  continue;
                }
                let op_score = scorer.score(&op, &ctx);
                let step = ParseStep {
                  op,
                  children: vec![l, r],
                  op_score,
                  score: op_score + children_score,
                  unary: false,
                };
                cell.add(&mut chart, step);
              }
            }
          }
        }

        // one unary pass over what binary and lexical steps built
        if rules.has_unary() {
          let base = cell
            .groups
            .iter()
            .copied()
            .filter(|&g| chart.groups[g].base_best.is_some())
            .collect::<Vec<_>>();
          for g in base {
            let group = &chart.groups[g];
            let base_score = group.base_best_score;
            for (rule, category) in rules.apply_unary(&group.category, types) {
              let op = ParsingOp::rule(span, rule, category);
              if !filter.accept(&op) {
                continue;
              }
              let op_score = scorer.score(&op, &ctx);
              let step = ParseStep {
                op,
                children: vec![g],
                op_score,
                score: op_score + base_score,
                unary: true,
              };
              cell.add(&mut chart, step);
            }
          }
        }

        let groups = cell.finish(&chart, self.cells_per_span);
        trace!(span = %span, groups = groups.len(), "filled cell");
        if !groups.is_empty() {
          chart.cells.insert(span, groups);
        }
      }
    }

    chart.derivations = chart
      .cell(Span::new(0, n))
      .iter()
      .copied()
      .filter(|&g| grammar.is_root(chart.groups[g].category.syntax()))
      .collect();

    debug!(
      tokens = n,
      groups = chart.groups.len(),
      steps = chart.steps.len(),
      derivations = chart.derivations.len(),
      "chart parse finished"
    );
    chart
  }
}
