//! Simple recursive-descent parsing of types, categories, terms and lexicons
//!
//! ```text
//! type     := NAME | '<' type ',' type '>'
//! syntax   := primary (('/' | '\') primary)*        (left-associative)
//! primary  := NAME | '(' syntax ')'
//! term     := ('λ' | '\' | 'lambda') NAME ':' type '.' term
//!           | atom ('(' term (',' term)* ')')*
//! atom     := '(' term ')' | NAME [':' type]
//! category := syntax [':' term]
//! entry    := WORD+ ':-' category ['@fixed' | '@learned' | '@generated']
//! ```
use regex::Regex;
use std::str::FromStr;

use crate::category::Category;
use crate::lexicon::{LexicalEntry, Origin};
use crate::semantics::Term;
use crate::syntax::{Slash, Syntax};
use crate::types::{Type, TypeRepository};
use crate::Err;

type Infallible<'a, T> = (T, &'a str);
type ParseResult<'a, T> = Result<(T, &'a str), Err>;

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

/// Try to consume a regex, returning None if it doesn't match at the start of `s`
fn optional_re<'a>(re: &'static Regex, s: &'a str) -> Infallible<'a, Option<&'a str>> {
  match re.find(s) {
    Some(m) if m.start() == 0 => {
      let (_, rest) = s.split_at(m.end());
      (Some(m.as_str()), rest)
    }
    _ => (None, s),
  }
}

/// Try to consume a regex, failing if it doesn't match
fn needed_re<'a>(re: &'static Regex, s: &'a str) -> ParseResult<'a, &'a str> {
  if let (Some(c), rest) = optional_re(re, s) {
    Ok((c, rest))
  } else {
    Err(format!("couldn't match {} at {}", re, s).into())
  }
}

/// Try to consume a char, returning None if it doesn't match
fn optional_char(c: char, s: &str) -> Infallible<'_, Option<char>> {
  match s.strip_prefix(c) {
    Some(rest) => (Some(c), rest),
    None => (None, s),
  }
}

/// Try to consume a char, failing if it doesn't match
fn needed_char(c: char, s: &str) -> ParseResult<'_, char> {
  if let (Some(c), rest) = optional_char(c, s) {
    Ok((c, rest))
  } else {
    Err(format!("couldn't match {} at {}", c, s).into())
  }
}

fn skip_whitespace(s: &str) -> &str {
  s.trim_start()
}

/// Tries to parse a name made of letters, numbers and _, optionally prefixed with $
fn parse_name(s: &str) -> ParseResult<'_, &str> {
  regex_static!(NAME, r"^\$?[a-zA-Z0-9_]+");
  needed_re(&*NAME, s).map_err(|err| format!("name: {}", err).into())
}

/// Errors unless only whitespace is left
fn expect_end(s: &str) -> Result<(), Err> {
  let s = skip_whitespace(s);
  if s.is_empty() {
    Ok(())
  } else {
    Err(format!("trailing input: {}", s).into())
  }
}

pub fn parse_type(s: &str) -> ParseResult<'_, Type> {
  let s = skip_whitespace(s);
  if let (Some(_), s) = optional_char('<', s) {
    let (arg, s) = parse_type(s)?;
    let s = skip_whitespace(s);
    let (_, s) = needed_char(',', s)?;
    let (ret, s) = parse_type(s)?;
    let s = skip_whitespace(s);
    let (_, s) = needed_char('>', s)?;
    Ok((Type::arrow(arg, ret), s))
  } else {
    let (name, s) = parse_name(s).map_err(|e| -> Err { format!("type: {}", e).into() })?;
    Ok((Type::atomic(name), s))
  }
}

impl FromStr for Type {
  type Err = Err;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (ty, rest) = parse_type(s)?;
    expect_end(rest)?;
    Ok(ty)
  }
}

fn parse_syntax_primary(s: &str) -> ParseResult<'_, Syntax> {
  let s = skip_whitespace(s);
  if let (Some(_), s) = optional_char('(', s) {
    let (syntax, s) = parse_syntax(s)?;
    let s = skip_whitespace(s);
    let (_, s) = needed_char(')', s)?;
    Ok((syntax, s))
  } else {
    let (name, s) = parse_name(s).map_err(|e| -> Err { format!("syntax: {}", e).into() })?;
    Ok((Syntax::atomic(name), s))
  }
}

pub fn parse_syntax(s: &str) -> ParseResult<'_, Syntax> {
  let (mut syntax, mut rem) = parse_syntax_primary(s)?;
  loop {
    let s = skip_whitespace(rem);
    let slash = if let (Some(_), s) = optional_char('/', s) {
      (Slash::Forward, s)
    } else if let (Some(_), s) = optional_char('\\', s) {
      (Slash::Backward, s)
    } else {
      return Ok((syntax, rem));
    };
    let (arg, s) = parse_syntax_primary(slash.1)?;
    syntax = Syntax::complex(syntax, slash.0, arg);
    rem = s;
  }
}

impl FromStr for Syntax {
  type Err = Err;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (syntax, rest) = parse_syntax(s)?;
    expect_end(rest)?;
    Ok(syntax)
  }
}

/// Parses a term. `scope` holds the bound variable names, innermost last.
fn parse_term_in<'a>(
  s: &'a str,
  types: &TypeRepository,
  scope: &mut Vec<String>,
) -> ParseResult<'a, Term> {
  regex_static!(LAMBDA, r"^(λ|\\|lambda\b)");

  let s = skip_whitespace(s);
  if let (Some(_), s) = optional_re(&*LAMBDA, s) {
    let s = skip_whitespace(s);
    let (name, s) = parse_name(s).map_err(|e| -> Err { format!("binder: {}", e).into() })?;
    let s = skip_whitespace(s);
    let (_, s) = needed_char(':', s)?;
    let (ty, s) = parse_type(s)?;
    types.validate(&ty)?;
    let s = skip_whitespace(s);
    let (_, s) = needed_char('.', s)?;

    scope.push(name.to_string());
    let body = parse_term_in(s, types, scope);
    scope.pop();
    let (body, s) = body?;
    return Ok((Term::lambda(ty, body), s));
  }

  let (mut term, mut rem) = parse_term_atom(s, types, scope)?;
  loop {
    let s = skip_whitespace(rem);
    let (open, s) = optional_char('(', s);
    if open.is_none() {
      return Ok((term, rem));
    }

    let mut s = s;
    loop {
      let (arg, after) = parse_term_in(s, types, scope)?;
      term = Term::app(term, arg);
      let after = skip_whitespace(after);
      if let (Some(_), after) = optional_char(',', after) {
        s = after;
      } else {
        let (_, after) = needed_char(')', after)?;
        s = after;
        break;
      }
    }
    rem = s;
  }
}

fn parse_term_atom<'a>(
  s: &'a str,
  types: &TypeRepository,
  scope: &mut Vec<String>,
) -> ParseResult<'a, Term> {
  let s = skip_whitespace(s);
  if let (Some(_), s) = optional_char('(', s) {
    let (term, s) = parse_term_in(s, types, scope)?;
    let s = skip_whitespace(s);
    let (_, s) = needed_char(')', s)?;
    return Ok((term, s));
  }

  let (name, s) = parse_name(s).map_err(|e| -> Err { format!("term: {}", e).into() })?;
  if let Some(pos) = scope.iter().rposition(|bound| bound == name) {
    return Ok((Term::Var(scope.len() - 1 - pos), s));
  }

  // an annotation right after the name gives the constant's type inline
  let (colon, after) = optional_char(':', s);
  if colon.is_some() {
    let (ty, after) = parse_type(after)?;
    types.validate(&ty)?;
    return Ok((Term::constant(name, ty), after));
  }

  match types.constant_type(name) {
    Some(ty) => Ok((Term::constant(name, ty.clone()), s)),
    None => Err(format!("unknown constant '{}'", name).into()),
  }
}

pub fn parse_term<'a>(s: &'a str, types: &TypeRepository) -> ParseResult<'a, Term> {
  parse_term_in(s, types, &mut Vec::new())
}

/// Parses a complete closed, well-typed term
pub fn parse_term_str(s: &str, types: &TypeRepository) -> Result<Term, Err> {
  let (term, rest) = parse_term(s, types)?;
  expect_end(rest)?;
  if term.infer(types).is_none() {
    return Err(format!("ill-typed term: {}", term).into());
  }
  Ok(term.normalize())
}

pub fn parse_category<'a>(s: &'a str, types: &TypeRepository) -> ParseResult<'a, Category> {
  let (syntax, s) = parse_syntax(s)?;
  let rem = skip_whitespace(s);
  let (colon, rem) = optional_char(':', rem);
  if colon.is_none() {
    return Ok((Category::syntactic(syntax), s));
  }

  let (term, rem) = parse_term(rem, types)?;
  if term.infer(types).is_none() {
    return Err(format!("ill-typed semantics for {}: {}", syntax, term).into());
  }
  Ok((Category::new(syntax, Some(term)), rem))
}

impl Category {
  /// Parses `Syntax [: term]`, checking that the semantics is well-typed.
  pub fn parse(s: &str, types: &TypeRepository) -> Result<Self, Err> {
    let (category, rest) = parse_category(s, types)?;
    expect_end(rest)?;
    Ok(category)
  }
}

fn parse_origin(s: &str) -> ParseResult<'_, Origin> {
  let s = skip_whitespace(s);
  let (at, s) = optional_char('@', s);
  if at.is_none() {
    return Ok((Origin::FixedDomain, s));
  }
  let (name, s) = parse_name(s)?;
  let origin = match name {
    "fixed" => Origin::FixedDomain,
    "learned" => Origin::Learned,
    "generated" => Origin::Generated,
    _ => return Err(format!("unknown entry origin @{}", name).into()),
  };
  Ok((origin, s))
}

/// Parses one `tokens :- Category [@origin]` line
pub fn parse_entry(line: &str, types: &TypeRepository) -> Result<LexicalEntry, Err> {
  let (tokens, rest) = line
    .split_once(":-")
    .ok_or_else(|| -> Err { format!("missing ':-' in entry: {}", line).into() })?;

  let tokens = tokens
    .split_whitespace()
    .map(str::to_string)
    .collect::<Vec<_>>();
  if tokens.is_empty() {
    return Err(format!("entry has no tokens: {}", line).into());
  }

  let (category, rest) = parse_category(rest, types)?;
  let (origin, rest) = parse_origin(rest)?;
  expect_end(rest)?;

  Ok(LexicalEntry::new(tokens, category, origin))
}

/// Parses a whole lexicon file, one entry per line. Blank lines and lines
/// starting with `//` are skipped.
pub fn parse_entries(src: &str, types: &TypeRepository) -> Result<Vec<LexicalEntry>, Err> {
  let mut entries = Vec::new();
  for (lineno, line) in src.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") {
      continue;
    }
    let entry =
      parse_entry(line, types).map_err(|e| -> Err { format!("line {}: {}", lineno + 1, e).into() })?;
    entries.push(entry);
  }
  Ok(entries)
}
