/*
 * fragment.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Conversion of engine markup into structured fragments.
 */

//! Structured fragments built from engine markup.
//!
//! Citation engines emit small HTML snippets (`<div class="csl-entry">`,
//! `<i>`, `<span style="...">`). [`parse`] turns such a snippet into a
//! [`Fragment`]: a forest of elements and text that a rendering layer can
//! walk without re-parsing strings.
//!
//! The parser is deliberately lenient about HTML that is not well-formed
//! XML: void elements such as `<br>` need no closing tag, attributes may be
//! unquoted or valueless, and the common named HTML entities are resolved.
//! Unknown entities and bare ampersands are kept as literal text.

use std::borrow::Cow;
use std::fmt;

use quick_xml::Reader;
use quick_xml::escape::{escape, partial_escape, resolve_predefined_entity};
use quick_xml::events::{BytesStart, BytesText, Event};
use serde::Serialize;
use thiserror::Error;

/// Errors produced while converting markup to a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    /// Syntax error from the underlying tokenizer.
    #[error("markup syntax error at byte {position}: {message}")]
    Syntax { message: String, position: u64 },

    /// A closing tag did not match the innermost open element.
    #[error("mismatched end tag: expected </{expected}>, found </{found}>")]
    MismatchedEndTag { expected: String, found: String },

    /// A closing tag appeared with no open element.
    #[error("unexpected end tag </{found}>")]
    UnexpectedEndTag { found: String },

    /// Input ended while an element was still open.
    #[error("element <{name}> is never closed")]
    UnclosedElement { name: String },
}

/// Elements that never have content or a closing tag in HTML.
const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "wbr", "input", "meta", "link"];

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

/// Named HTML entities engines are known to emit, beyond the five XML ones.
fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    resolve_predefined_entity(entity).or(match entity {
        "nbsp" => Some("\u{a0}"),
        "ensp" => Some("\u{2002}"),
        "emsp" => Some("\u{2003}"),
        "thinsp" => Some("\u{2009}"),
        "zwj" => Some("\u{200d}"),
        "zwnj" => Some("\u{200c}"),
        "shy" => Some("\u{ad}"),
        "ndash" => Some("\u{2013}"),
        "mdash" => Some("\u{2014}"),
        "hellip" => Some("\u{2026}"),
        "lsquo" => Some("\u{2018}"),
        "rsquo" => Some("\u{2019}"),
        "ldquo" => Some("\u{201c}"),
        "rdquo" => Some("\u{201d}"),
        "laquo" => Some("\u{ab}"),
        "raquo" => Some("\u{bb}"),
        "lsaquo" => Some("\u{2039}"),
        "rsaquo" => Some("\u{203a}"),
        "middot" => Some("\u{b7}"),
        "bull" => Some("\u{2022}"),
        "sect" => Some("\u{a7}"),
        "para" => Some("\u{b6}"),
        "copy" => Some("\u{a9}"),
        "deg" => Some("\u{b0}"),
        "times" => Some("\u{d7}"),
        "aacute" => Some("\u{e1}"),
        "agrave" => Some("\u{e0}"),
        "acirc" => Some("\u{e2}"),
        "auml" => Some("\u{e4}"),
        "ccedil" => Some("\u{e7}"),
        "eacute" => Some("\u{e9}"),
        "egrave" => Some("\u{e8}"),
        "ecirc" => Some("\u{ea}"),
        "euml" => Some("\u{eb}"),
        "iacute" => Some("\u{ed}"),
        "iuml" => Some("\u{ef}"),
        "ntilde" => Some("\u{f1}"),
        "oacute" => Some("\u{f3}"),
        "ocirc" => Some("\u{f4}"),
        "ouml" => Some("\u{f6}"),
        "oslash" => Some("\u{f8}"),
        "uacute" => Some("\u{fa}"),
        "uuml" => Some("\u{fc}"),
        "szlig" => Some("\u{df}"),
        "Eacute" => Some("\u{c9}"),
        "Auml" => Some("\u{c4}"),
        "Ouml" => Some("\u{d6}"),
        "Uuml" => Some("\u{dc}"),
        _ => None,
    })
}

/// Resolve a character reference body such as `#233` or `#xE9`.
fn resolve_char_ref(reference: &str) -> Option<char> {
    let digits = reference.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}

/// Longest entity name considered; anything longer is literal text.
const MAX_ENTITY_LEN: usize = 32;

/// Unescape entity and character references, keeping anything that does
/// not resolve (unknown names, bare `&`) as written.
fn unescape_lenient(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let resolved = after
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_ENTITY_LEN)
            .and_then(|end| {
                let name = &after[..end];
                let text = match resolve_char_ref(name) {
                    Some(c) => Cow::Owned(c.to_string()),
                    None => Cow::Borrowed(resolve_html_entity(name)?),
                };
                Some((text, end))
            });
        match resolved {
            Some((text, end)) => {
                out.push_str(&text);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// A name/value attribute pair, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// An element with its attributes and children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    /// Get the value of an attribute by name.
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

/// A node in a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                for child in &element.children {
                    child.collect_text(out);
                }
            }
        }
    }

    fn write_markup(&self, out: &mut String) {
        match self {
            Node::Text(text) => out.push_str(&partial_escape(text.as_str())),
            Node::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for attr in &element.attributes {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    out.push_str(&escape(attr.value.as_str()));
                    out.push('"');
                }
                if is_void(&element.name) {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for child in &element.children {
                    child.write_markup(out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }
}

/// A parsed markup fragment: zero or more top-level nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Fragment {
    nodes: Vec<Node>,
}

impl Fragment {
    /// A fragment with no content.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The top-level nodes.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Concatenated text of all nodes, with markup removed.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            node.collect_text(&mut out);
        }
        out
    }

    /// Serialize back to markup.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            node.write_markup(&mut out);
        }
        out
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_markup())
    }
}

/// Parse engine markup into a [`Fragment`].
///
/// # Example
///
/// ```rust
/// use quarto_references::fragment::parse;
///
/// let fragment = parse(r#"<div class="csl-entry">Doe. <i>Foo</i>.</div>"#).unwrap();
/// assert_eq!(fragment.text_content(), "Doe. Foo.");
/// ```
///
/// # Errors
///
/// Returns a [`MarkupError`] for tokenizer errors and unbalanced tags.
/// Unresolvable entities are not errors.
pub fn parse(markup: &str) -> Result<Fragment, MarkupError> {
    FragmentParser::new(markup).parse()
}

/// An element whose closing tag has not been seen yet.
struct OpenElement {
    name: String,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
}

struct FragmentParser<'a> {
    reader: Reader<&'a [u8]>,
    stack: Vec<OpenElement>,
    roots: Vec<Node>,
}

impl<'a> FragmentParser<'a> {
    fn new(markup: &'a str) -> Self {
        let mut reader = Reader::from_str(markup);
        reader.config_mut().trim_text_start = false;
        reader.config_mut().trim_text_end = false;
        // Void elements make end-name checking our job.
        reader.config_mut().check_end_names = false;

        Self {
            reader,
            stack: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Fragment, MarkupError> {
        loop {
            match self.reader.read_event() {
                Ok(Event::Start(e)) => {
                    let (name, attributes) = self.read_tag(&e)?;
                    if is_void(&name) {
                        self.push_node(Node::Element(Element {
                            name,
                            attributes,
                            children: Vec::new(),
                        }));
                    } else {
                        self.stack.push(OpenElement {
                            name,
                            attributes,
                            children: Vec::new(),
                        });
                    }
                }
                Ok(Event::Empty(e)) => {
                    let (name, attributes) = self.read_tag(&e)?;
                    self.push_node(Node::Element(Element {
                        name,
                        attributes,
                        children: Vec::new(),
                    }));
                }
                Ok(Event::End(e)) => {
                    let found = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if is_void(&found) {
                        continue;
                    }
                    let open = self
                        .stack
                        .pop()
                        .ok_or_else(|| MarkupError::UnexpectedEndTag {
                            found: found.clone(),
                        })?;
                    if open.name != found {
                        return Err(MarkupError::MismatchedEndTag {
                            expected: open.name,
                            found,
                        });
                    }
                    self.push_node(Node::Element(Element {
                        name: open.name,
                        attributes: open.attributes,
                        children: open.children,
                    }));
                }
                Ok(Event::Text(e)) => {
                    let text = Self::read_text(&e);
                    self.push_text(text);
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    self.push_text(text);
                }
                Ok(Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_)) => {}
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(MarkupError::Syntax {
                        message: e.to_string(),
                        position: self.reader.error_position() as u64,
                    });
                }
            }
        }

        if let Some(open) = self.stack.pop() {
            return Err(MarkupError::UnclosedElement { name: open.name });
        }

        Ok(Fragment { nodes: self.roots })
    }

    fn read_tag(&self, e: &BytesStart<'_>) -> Result<(String, Vec<Attribute>), MarkupError> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in e.html_attributes() {
            let attr = attr.map_err(|err| self.syntax_error(err.to_string()))?;
            let raw = String::from_utf8_lossy(&attr.value);
            attributes.push(Attribute {
                name: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value: unescape_lenient(&raw).into_owned(),
            });
        }
        Ok((name, attributes))
    }

    fn read_text(e: &BytesText<'_>) -> String {
        let raw = String::from_utf8_lossy(e.as_ref());
        unescape_lenient(&raw).into_owned()
    }

    fn syntax_error(&self, message: String) -> MarkupError {
        MarkupError::Syntax {
            message,
            position: self.reader.buffer_position() as u64,
        }
    }

    fn push_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        // Whitespace between top-level entries is layout, not content.
        if self.stack.is_empty() && text.trim().is_empty() {
            return;
        }
        // Adjacent text events (e.g. around CDATA) merge into one node.
        let siblings = match self.stack.last_mut() {
            Some(open) => &mut open.children,
            None => &mut self.roots,
        };
        if let Some(Node::Text(previous)) = siblings.last_mut() {
            previous.push_str(&text);
        } else {
            siblings.push(Node::Text(text));
        }
    }

    fn push_node(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(open) => open.children.push(node),
            None => self.roots.push(node),
        }
    }
}
