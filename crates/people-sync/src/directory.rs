//! Directory source contract and an in-memory implementation.
//!
//! A source is read through a paged cursor: each page carries an opaque
//! cookie for the next one, and an absent cookie ends the search. A search
//! left before its last page must be abandoned so the source can release
//! its cursor.

use std::{future::Future, io::BufRead};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Entries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAttribute {
  pub name:   String,
  pub values: Vec<String>,
}

/// One raw record as the directory returns it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectoryEntry {
  #[serde(default)]
  pub dn:         String,
  #[serde(default)]
  pub attributes: Vec<EntryAttribute>,
}

impl DirectoryEntry {
  pub fn new(dn: impl Into<String>) -> Self {
    Self { dn: dn.into(), attributes: Vec::new() }
  }

  pub fn with(mut self, name: &str, value: &str) -> Self {
    self.push(name, value);
    self
  }

  pub fn push(&mut self, name: &str, value: &str) {
    match self.attributes.iter_mut().find(|a| a.name == name) {
      Some(attr) => attr.values.push(value.to_string()),
      None => self.attributes.push(EntryAttribute {
        name:   name.to_string(),
        values: vec![value.to_string()],
      }),
    }
  }

  /// All values of `name`; attribute names compare case-insensitively.
  pub fn values(&self, name: &str) -> &[String] {
    self
      .attributes
      .iter()
      .find(|a| a.name.eq_ignore_ascii_case(name))
      .map(|a| a.values.as_slice())
      .unwrap_or_default()
  }

  pub fn first(&self, name: &str) -> Option<&str> {
    self.values(name).first().map(String::as_str)
  }
}

// ─── Search contract ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
  pub filter:     String,
  /// Attributes to return; empty means all.
  pub attributes: Vec<String>,
  pub page_size:  usize,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
  pub entries: Vec<DirectoryEntry>,
  /// Cursor for the next page; `None` on the last one.
  pub cookie:  Option<Vec<u8>>,
}

/// A paged, filterable directory of people.
pub trait DirectorySource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch one page. `cookie` is `None` for the first page.
  fn search_page(
    &self,
    request: SearchRequest,
    cookie: Option<Vec<u8>>,
  ) -> impl Future<Output = Result<Page, Self::Error>> + Send + '_;

  /// Release the cursor identified by `cookie`.
  fn abandon(
    &self,
    request: SearchRequest,
    cookie: Vec<u8>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── StaticSource ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("invalid filter {filter:?}: {reason}")]
  Filter { filter: String, reason: &'static str },

  #[error("invalid page cookie")]
  Cookie,

  #[error("line {line}: {source}")]
  Entry {
    line:   usize,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// An in-memory directory, typically loaded from a JSON-lines dump with one
/// [`DirectoryEntry`] per line.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
  entries: Vec<DirectoryEntry>,
}

impl StaticSource {
  pub fn new(entries: Vec<DirectoryEntry>) -> Self { Self { entries } }

  pub fn from_json_lines(reader: impl BufRead) -> Result<Self, SourceError> {
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      let entry = serde_json::from_str(&line)
        .map_err(|source| SourceError::Entry { line: i + 1, source })?;
      entries.push(entry);
    }
    Ok(Self { entries })
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  fn page(
    &self,
    request: &SearchRequest,
    cookie: Option<&[u8]>,
  ) -> Result<Page, SourceError> {
    let filter = Filter::parse(&request.filter)?;
    let offset = match cookie {
      None => 0,
      Some(c) => std::str::from_utf8(c)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(SourceError::Cookie)?,
    };
    let page_size = request.page_size.max(1);

    let mut matching = self.entries.iter().filter(|e| filter.matches(e)).skip(offset);
    let entries: Vec<DirectoryEntry> = matching
      .by_ref()
      .take(page_size)
      .map(|e| project(e, &request.attributes))
      .collect();
    let cookie = matching
      .next()
      .map(|_| (offset + entries.len()).to_string().into_bytes());

    Ok(Page { entries, cookie })
  }
}

fn project(entry: &DirectoryEntry, attributes: &[String]) -> DirectoryEntry {
  if attributes.is_empty() {
    return entry.clone();
  }
  DirectoryEntry {
    dn:         entry.dn.clone(),
    attributes: entry
      .attributes
      .iter()
      .filter(|a| attributes.iter().any(|want| want.eq_ignore_ascii_case(&a.name)))
      .cloned()
      .collect(),
  }
}

impl DirectorySource for StaticSource {
  type Error = SourceError;

  async fn search_page(
    &self,
    request: SearchRequest,
    cookie: Option<Vec<u8>>,
  ) -> Result<Page, SourceError> {
    self.page(&request, cookie.as_deref())
  }

  async fn abandon(
    &self,
    _request: SearchRequest,
    _cookie: Vec<u8>,
  ) -> Result<(), SourceError> {
    Ok(())
  }
}

// ─── Filters ─────────────────────────────────────────────────────────────────

/// The subset of directory search filters the bundled source evaluates:
/// equality, presence and the `&`, `|`, `!` combinators. Matching is
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
  Equals(String, String),
  Present(String),
  And(Vec<Filter>),
  Or(Vec<Filter>),
  Not(Box<Filter>),
}

impl Filter {
  pub fn parse(input: &str) -> Result<Self, SourceError> {
    let err = |reason| SourceError::Filter { filter: input.to_string(), reason };
    let mut parser = FilterParser { rest: input.trim() };
    let filter = parser.filter().map_err(&err)?;
    if !parser.rest.is_empty() {
      return Err(err("trailing input"));
    }
    Ok(filter)
  }

  pub fn matches(&self, entry: &DirectoryEntry) -> bool {
    match self {
      Filter::Equals(attr, value) => {
        entry.values(attr).iter().any(|v| v.eq_ignore_ascii_case(value))
      }
      Filter::Present(attr) => !entry.values(attr).is_empty(),
      Filter::And(all) => all.iter().all(|f| f.matches(entry)),
      Filter::Or(any) => any.iter().any(|f| f.matches(entry)),
      Filter::Not(f) => !f.matches(entry),
    }
  }
}

struct FilterParser<'a> {
  rest: &'a str,
}

impl FilterParser<'_> {
  fn eat(&mut self, c: char) -> Result<(), &'static str> {
    self.rest = self.rest.strip_prefix(c).ok_or(match c {
      '(' => "expected '('",
      _ => "expected ')'",
    })?;
    Ok(())
  }

  fn filter(&mut self) -> Result<Filter, &'static str> {
    self.eat('(')?;
    let filter = match self.rest.chars().next() {
      Some('&') => {
        self.rest = &self.rest[1..];
        Filter::And(self.list()?)
      }
      Some('|') => {
        self.rest = &self.rest[1..];
        Filter::Or(self.list()?)
      }
      Some('!') => {
        self.rest = &self.rest[1..];
        Filter::Not(Box::new(self.filter()?))
      }
      Some(_) => self.item()?,
      None => return Err("unexpected end of filter"),
    };
    self.eat(')')?;
    Ok(filter)
  }

  fn list(&mut self) -> Result<Vec<Filter>, &'static str> {
    let mut filters = Vec::new();
    while self.rest.starts_with('(') {
      filters.push(self.filter()?);
    }
    if filters.is_empty() {
      return Err("empty filter list");
    }
    Ok(filters)
  }

  fn item(&mut self) -> Result<Filter, &'static str> {
    let end = self.rest.find(')').ok_or("unterminated item")?;
    let (item, rest) = self.rest.split_at(end);
    self.rest = rest;

    let (attr, value) = item.split_once('=').ok_or("expected '='")?;
    let attr = attr.trim();
    if attr.is_empty() {
      return Err("empty attribute name");
    }
    match value {
      "*" => Ok(Filter::Present(attr.to_string())),
      v if v.contains('*') => Err("substring matches are not supported"),
      v => Ok(Filter::Equals(attr.to_string(), v.to_string())),
    }
  }
}
