//! CERIF organization messages.
//!
//! A message describes one organizational unit as a set of time-stamped
//! attribute observations. Names, acronyms and class-coded relations
//! (types, parent edges, federated ids) are flattened into
//! [`AttributeObservation`]s that the projector later folds onto the stored
//! organization.
//!
//! Namespace prefixes are ignored throughout.

use chrono::{DateTime, Utc};
use people_core::temporal::{AttributeObservation, ValidityWindow};
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;

use crate::error::{Error, Result};

// ─── Message ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "attributes", rename_all = "lowercase")]
pub enum Intent {
  Update(Vec<AttributeObservation>),
  Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
  /// External (GISMO) organization id.
  pub id:     String,
  /// Value of the envelope's `date` attribute, uninterpreted.
  pub date:   String,
  #[serde(flatten)]
  pub intent: Intent,
}

impl Message {
  pub fn observations(&self) -> &[AttributeObservation] {
    match &self.intent {
      Intent::Update(observations) => observations,
      Intent::Delete => &[],
    }
  }
}

/// Class URIs and the attribute each one produces.
const TYPE_CLASSES: &[(&str, &str)] = &[
  ("/be.ugent/organisatie/type/campus", "campus"),
  ("/be.ugent/organisatie/type/vakgroep", "department"),
  ("/be.ugent/organisatie/type/faculteit", "faculty"),
  ("/be.ugent/organisatie/type/universiteit", "university"),
];

const PARENT_CLASS: &str =
  "/be.ugent/gismo/organisatie-organisatie/type/kind-van";

const FEDERATED_ID_CLASSES: &[(&str, &str)] = &[
  (
    "/be.ugent/gismo/organisatie/federated-id/memorialis",
    "ugent_memorialis_id",
  ),
  ("/be.ugent/gismo/organisatie/federated-id/org-code", "code"),
  ("/be.ugent/gismo/organisatie/federated-id/biblio-code", "biblio_code"),
];

/// Parse one organization message from raw XML.
pub fn parse_message(xml: &[u8]) -> Result<Message> {
  let doc = Node::parse(xml)?;

  let unit = *doc
    .descendants("cfOrgUnit")
    .first()
    .ok_or(Error::MissingNode("//cfOrgUnit"))?;
  let id = unit
    .child("cfOrgUnitId")
    .ok_or(Error::MissingNode("//cfOrgUnit/cfOrgUnitId"))?
    .inner_text();
  let envelope = doc
    .descendants("Body")
    .into_iter()
    .find_map(|body| body.child("organizations"))
    .ok_or(Error::MissingNode("//Body/organizations"))?;
  let date = envelope.attr("date").unwrap_or_default().to_string();

  if unit.attr("action") == Some("DELETE") {
    return Ok(Message { id, date, intent: Intent::Delete });
  }

  let mut observations = Vec::new();

  if let Some(acro) = unit.child("cfAcro") {
    observations.push(AttributeObservation::new(
      "acronym",
      acro.inner_text(),
      ValidityWindow::always(),
    ));
  }

  for name in unit.children("cfName") {
    let start = parse_date(name.attr("cfStartDate").unwrap_or_default())?;
    let end = parse_date(name.attr("cfEndDate").unwrap_or_default())?;
    observations.push(AttributeObservation::new(
      format!("name_{}", name.attr("cfLangCode").unwrap_or_default()),
      name.inner_text(),
      ValidityWindow::new(start, Some(end)),
    ));
  }

  for (class, kind) in TYPE_CLASSES {
    for (_, window) in doc.values_by_class("cfOrgUnit_Class", class, None) {
      observations.push(AttributeObservation::new("type", *kind, window));
    }
  }

  for (value, window) in
    doc.values_by_class("cfOrgUnit_OrgUnit", PARENT_CLASS, Some("cfOrgUnitId1"))
  {
    observations.push(AttributeObservation::new("parent_id", value, window));
  }

  for (class, name) in FEDERATED_ID_CLASSES {
    for (value, window) in doc.values_by_class("cfFedId", class, Some("cfFedId"))
    {
      observations.push(AttributeObservation::new(*name, value, window));
    }
  }

  Ok(Message { id, date, intent: Intent::Update(observations) })
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
  let s = s.trim();
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|source| Error::InvalidDate { value: s.to_string(), source })
}

// ─── Document tree ───────────────────────────────────────────────────────────

/// A minimal element tree; enough for the path queries CERIF needs.
#[derive(Debug, Default)]
struct Node {
  name:     String,
  attrs:    Vec<(String, String)>,
  text:     String,
  children: Vec<Node>,
}

impl Node {
  fn parse(xml: &[u8]) -> Result<Self> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    // stack[0] is the synthetic document root
    let mut stack: Vec<Node> = vec![Node::default()];
    let mut buf = Vec::new();

    loop {
      match reader.read_event_into(&mut buf) {
        Ok(Event::Start(ref e)) => stack.push(Node::from_start(e)?),
        Ok(Event::Empty(ref e)) => {
          let node = Node::from_start(e)?;
          push_child(&mut stack, node);
        }
        Ok(Event::End(_)) => {
          if stack.len() < 2 {
            return Err(Error::Xml("unbalanced end tag".into()));
          }
          if let Some(node) = stack.pop() {
            push_child(&mut stack, node);
          }
        }
        Ok(Event::Text(ref e)) => {
          let text = e.unescape().map_err(|e| Error::Xml(e.to_string()))?;
          append_text(&mut stack, &text);
        }
        Ok(Event::CData(ref e)) => {
          append_text(&mut stack, &String::from_utf8_lossy(e.as_ref()));
        }
        Ok(Event::Eof) => break,
        Err(e) => return Err(Error::Xml(e.to_string())),
        _ => {}
      }
      buf.clear();
    }

    if stack.len() != 1 {
      return Err(Error::Xml("unexpected end of document".into()));
    }
    stack.pop().ok_or_else(|| Error::Xml("empty document".into()))
  }

  fn from_start(e: &BytesStart<'_>) -> Result<Self> {
    let name = e.name();
    let mut node = Node {
      name: String::from_utf8_lossy(local_name(name.as_ref())).into_owned(),
      ..Default::default()
    };
    for attr in e.attributes() {
      let attr = attr.map_err(|e| Error::Xml(e.to_string()))?;
      let key =
        String::from_utf8_lossy(local_name(attr.key.as_ref())).into_owned();
      let value = attr
        .unescape_value()
        .map_err(|e| Error::Xml(e.to_string()))?
        .into_owned();
      node.attrs.push((key, value));
    }
    Ok(node)
  }

  fn attr(&self, key: &str) -> Option<&str> {
    self
      .attrs
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  fn children<'a, 'n>(
    &'a self,
    name: &'n str,
  ) -> impl Iterator<Item = &'a Node> + use<'a, 'n> {
    self.children.iter().filter(move |c| c.name == name)
  }

  fn child(&self, name: &str) -> Option<&Node> { self.children(name).next() }

  /// Every descendant named `name`, in document order.
  fn descendants(&self, name: &str) -> Vec<&Node> {
    let mut out = Vec::new();
    self.collect_descendants(name, &mut out);
    out
  }

  fn collect_descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a Node>) {
    for child in &self.children {
      if child.name == name {
        out.push(child);
      }
      child.collect_descendants(name, out);
    }
  }

  /// Text of this node and all its descendants, trimmed.
  fn inner_text(&self) -> String {
    let mut text = String::new();
    self.collect_text(&mut text);
    text.trim().to_string()
  }

  fn collect_text(&self, out: &mut String) {
    out.push_str(&self.text);
    for child in &self.children {
      child.collect_text(out);
    }
  }

  /// `//cfClass[contains(cfURI, uri)]/cfClassId`.
  fn class_id(&self, uri: &str) -> Option<String> {
    self
      .descendants("cfClass")
      .into_iter()
      .filter(|c| c.child("cfURI").is_some_and(|u| u.inner_text().contains(uri)))
      .find_map(|c| c.child("cfClassId"))
      .map(Node::inner_text)
      .filter(|id| !id.is_empty())
  }

  /// `//tag[contains(cfClassId, <class id of uri>)]`.
  fn nodes_by_class<'a>(&'a self, tag: &'a str, uri: &str) -> Vec<&'a Node> {
    let Some(class_id) = self.class_id(uri) else {
      return Vec::new();
    };
    self
      .descendants(tag)
      .into_iter()
      .filter(|n| {
        n.child("cfClassId")
          .is_some_and(|c| c.inner_text().contains(&class_id))
      })
      .collect()
  }

  /// Values and windows of class-coded nodes. Entries missing the value
  /// element or either date, or with an unparsable date, are skipped.
  fn values_by_class(
    &self,
    tag: &str,
    uri: &str,
    value_tag: Option<&str>,
  ) -> Vec<(String, ValidityWindow)> {
    self
      .nodes_by_class(tag, uri)
      .into_iter()
      .filter_map(|node| {
        let value = match value_tag {
          Some(t) => node.child(t)?.inner_text(),
          None => String::new(),
        };
        let start = parse_date(&node.child("cfStartDate")?.inner_text()).ok()?;
        let end = parse_date(&node.child("cfEndDate")?.inner_text()).ok()?;
        Some((value, ValidityWindow::new(start, Some(end))))
      })
      .collect()
  }
}

fn push_child(stack: &mut [Node], node: Node) {
  if let Some(parent) = stack.last_mut() {
    parent.children.push(node);
  }
}

fn append_text(stack: &mut [Node], text: &str) {
  if let Some(node) = stack.last_mut() {
    node.text.push_str(text);
  }
}

fn local_name(name: &[u8]) -> &[u8] {
  // strip "prefix:" if present
  if let Some(pos) = name.iter().rposition(|&b| b == b':') {
    &name[pos + 1..]
  } else {
    name
  }
}
