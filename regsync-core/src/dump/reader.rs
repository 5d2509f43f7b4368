//! Forward-only pull cursor over a dump stream.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{CHILDREN, CONTENT, IS_COLLECTION_ATTR, LAST_MODIFIED, NAME_ATTR, RESOURCE, VERSION};
use crate::error::DumpError;
use crate::types::DumpNode;

/// The significant token under the cursor.
///
/// Whitespace-only text, comments, processing instructions and the XML
/// declaration are never surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Nothing has been read yet.
    StartDocument,
    Start {
        name: String,
        attributes: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Text(String),
    Eof,
}

/// What followed a node's header, as reported by [`DumpReader::open_children`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildrenBlock {
    /// The node has no `<children>` element.
    Absent,
    /// `<children>` is present but lists nothing.
    Empty,
    /// `<children>` holds at least one `<resource>`; iterate with
    /// [`DumpReader::next_child`].
    Entries,
}

/// Pull cursor over a dump.
///
/// The low-level primitives (`advance`, `current_*`, `attribute`,
/// `skip_to_matching_end`) expose the raw token stream. The structured
/// operations build on them with one contract: every `<resource>` start and
/// end tag is consumed exactly once.
///
/// ```text
/// read_node()          cursor leaves on <children> or </resource>
/// open_children()      Absent | Empty | Entries
/// next_child()         true while another child <resource> is current
/// close_node()         cursor lands on this node's </resource>
/// ```
///
/// `close_node` may be called at any point after `read_node`; the rest of
/// the subtree is skipped.
pub struct DumpReader<R> {
    xml: Reader<R>,
    buf: Vec<u8>,
    current: Token,
    pending_child: bool,
}

impl DumpReader<BufReader<File>> {
    /// Open a dump spooled to disk.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(inner: R) -> Self {
        let mut xml = Reader::from_reader(inner);
        xml.config_mut().expand_empty_elements = true;
        Self {
            xml,
            buf: Vec::new(),
            current: Token::StartDocument,
            pending_child: false,
        }
    }

    // -----------------------------------------------------------------------
    // Token-level primitives
    // -----------------------------------------------------------------------

    pub fn current(&self) -> &Token {
        &self.current
    }

    pub fn current_is_start(&self) -> bool {
        matches!(self.current, Token::Start { .. })
    }

    pub fn current_is_end(&self) -> bool {
        matches!(self.current, Token::End { .. })
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.current, Token::Eof)
    }

    /// Local name of the current start or end tag.
    pub fn current_local_name(&self) -> Option<&str> {
        match &self.current {
            Token::Start { name, .. } | Token::End { name } => Some(name),
            _ => None,
        }
    }

    /// Attribute of the current start tag.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match &self.current {
            Token::Start { attributes, .. } => attributes
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    /// Move to the next significant token.
    ///
    /// Fails on malformed XML and when called with the cursor already at EOF.
    pub fn advance(&mut self) -> Result<(), DumpError> {
        if self.is_eof() {
            return Err(DumpError::UnexpectedEof {
                expected: "more input".to_owned(),
            });
        }
        loop {
            let token = match self.xml.read_event_into(&mut self.buf)? {
                Event::Start(e) => Some(Token::Start {
                    name: local_name(e.local_name().as_ref()),
                    attributes: attributes_of(&e)?,
                }),
                Event::End(e) => Some(Token::End {
                    name: local_name(e.local_name().as_ref()),
                }),
                Event::Text(e) => {
                    let text = e.unescape()?;
                    if text.trim().is_empty() {
                        None
                    } else {
                        Some(Token::Text(text.into_owned()))
                    }
                }
                Event::CData(e) => Some(Token::Text(String::from_utf8_lossy(&e).into_owned())),
                Event::Eof => Some(Token::Eof),
                _ => None,
            };
            self.buf.clear();
            if let Some(token) = token {
                self.current = token;
                return Ok(());
            }
        }
    }

    /// Consume tokens until the end tag `tag` closing the element the cursor
    /// is inside. Nested elements of the same name are balanced. The cursor
    /// is left on that end tag.
    pub fn skip_to_matching_end(&mut self, tag: &str) -> Result<(), DumpError> {
        let mut level = 0usize;
        loop {
            match &self.current {
                Token::Start { name, .. } if name == tag => level += 1,
                Token::End { name } if name == tag => {
                    if level == 0 {
                        return Ok(());
                    }
                    level -= 1;
                }
                Token::Eof => return Err(eof(&format!("</{tag}>"))),
                _ => {}
            }
            self.advance()?;
        }
    }

    /// Consume the element whose start tag is current, leaving the cursor on
    /// its end tag.
    pub fn skip_element(&mut self) -> Result<(), DumpError> {
        let Token::Start { name, .. } = &self.current else {
            return Ok(());
        };
        let name = name.clone();
        let mut depth = 1usize;
        while depth > 0 {
            self.advance()?;
            match &self.current {
                Token::Start { name: n, .. } if *n == name => depth += 1,
                Token::End { name: n } if *n == name => depth -= 1,
                Token::Eof => return Err(eof(&format!("</{name}>"))),
                _ => {}
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Structured operations
    // -----------------------------------------------------------------------

    /// Read the next `<resource>` header: attributes, `version`,
    /// `lastModified`, `content` and simple metadata elements.
    ///
    /// Returns `None` at end of input. On return the cursor sits on the
    /// node's `<children>` start tag or its `</resource>` end tag.
    pub fn read_node(&mut self) -> Result<Option<DumpNode>, DumpError> {
        self.pending_child = false;
        while !self.current_is_start() {
            if self.is_eof() {
                return Ok(None);
            }
            self.advance()?;
        }

        let Token::Start {
            name: element,
            attributes,
        } = &self.current
        else {
            return Ok(None);
        };
        if element != RESOURCE {
            return Err(DumpError::UnexpectedElement {
                found: element.clone(),
                expected: "<resource>".to_owned(),
            });
        }

        let mut node = DumpNode::default();
        let mut name = None;
        let mut is_collection = None;
        for (key, value) in attributes {
            match key.as_str() {
                NAME_ATTR => name = Some(value.clone()),
                IS_COLLECTION_ATTR => is_collection = Some(value.eq_ignore_ascii_case("true")),
                VERSION => node.version = Some(value.clone()),
                _ => {
                    node.attributes.insert(key.clone(), value.clone());
                }
            }
        }
        node.name = name.ok_or(DumpError::MissingAttribute {
            element: RESOURCE,
            attribute: NAME_ATTR,
        })?;
        node.is_collection = is_collection.ok_or(DumpError::MissingAttribute {
            element: RESOURCE,
            attribute: IS_COLLECTION_ATTR,
        })?;

        loop {
            self.advance()?;
            let field = match &self.current {
                Token::Start { name, .. } if name == CHILDREN => return Ok(Some(node)),
                Token::Start { name, .. } => name.clone(),
                Token::End { name } if name == RESOURCE => return Ok(Some(node)),
                Token::End { name } => {
                    return Err(DumpError::UnexpectedElement {
                        found: format!("/{name}"),
                        expected: "</resource>".to_owned(),
                    })
                }
                Token::Text(_) | Token::StartDocument => continue,
                Token::Eof => return Err(eof("</resource>")),
            };
            let Some(text) = self.read_element_text()? else {
                continue;
            };
            match field.as_str() {
                CONTENT => node.content = Some(decode_content(&node.name, &text)?),
                VERSION => node.version = Some(text.trim().to_owned()),
                LAST_MODIFIED => {
                    node.last_modified = Some(parse_last_modified(&node.name, &text)?)
                }
                _ => node.fields.push((field, text)),
            }
        }
    }

    /// Enter the `<children>` block following a header read by
    /// [`read_node`](Self::read_node).
    pub fn open_children(&mut self) -> Result<ChildrenBlock, DumpError> {
        if !matches!(&self.current, Token::Start { name, .. } if name == CHILDREN) {
            return Ok(ChildrenBlock::Absent);
        }
        loop {
            self.advance()?;
            match &self.current {
                Token::Start { name, .. } if name == RESOURCE => {
                    self.pending_child = true;
                    return Ok(ChildrenBlock::Entries);
                }
                Token::Start { .. } => self.skip_element()?,
                Token::End { name } if name == CHILDREN => return Ok(ChildrenBlock::Empty),
                Token::End { name } => {
                    return Err(DumpError::UnexpectedElement {
                        found: format!("/{name}"),
                        expected: "</children>".to_owned(),
                    })
                }
                Token::Eof => return Err(eof("</children>")),
                _ => {}
            }
        }
    }

    /// Position the cursor on the next child `<resource>`; `false` once
    /// `</children>` is reached. Only valid after `open_children` returned
    /// [`ChildrenBlock::Entries`].
    pub fn next_child(&mut self) -> Result<bool, DumpError> {
        if self.pending_child {
            self.pending_child = false;
            return Ok(true);
        }
        loop {
            self.advance()?;
            match &self.current {
                Token::Start { name, .. } if name == RESOURCE => return Ok(true),
                Token::Start { .. } => self.skip_element()?,
                Token::End { name } if name == CHILDREN => return Ok(false),
                Token::End { name } => {
                    return Err(DumpError::UnexpectedElement {
                        found: format!("/{name}"),
                        expected: "</children>".to_owned(),
                    })
                }
                Token::Eof => return Err(eof("</children>")),
                _ => {}
            }
        }
    }

    /// Skip whatever is left of the current node and land on its
    /// `</resource>`.
    pub fn close_node(&mut self) -> Result<(), DumpError> {
        self.pending_child = false;
        self.skip_to_matching_end(RESOURCE)
    }

    /// Text of the element whose start tag is current, or `None` when the
    /// element has nested structure. Leaves the cursor on its end tag.
    fn read_element_text(&mut self) -> Result<Option<String>, DumpError> {
        let element = self.current_local_name().unwrap_or_default().to_owned();
        let mut text = String::new();
        let mut nested = false;
        let mut depth = 1usize;
        loop {
            self.advance()?;
            match &self.current {
                Token::Text(t) if depth == 1 => text.push_str(t),
                Token::Start { .. } => {
                    nested = true;
                    depth += 1;
                }
                Token::End { .. } => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Token::Eof => return Err(eof(&format!("</{element}>"))),
                _ => {}
            }
        }
        Ok((!nested).then_some(text))
    }
}

fn local_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn attributes_of(start: &BytesStart<'_>) -> Result<Vec<(String, String)>, DumpError> {
    start
        .attributes()
        .map(|attr| {
            let attr = attr?;
            Ok((
                local_name(attr.key.local_name().as_ref()),
                attr.unescape_value()?.into_owned(),
            ))
        })
        .collect()
}

fn decode_content(name: &str, text: &str) -> Result<Vec<u8>, DumpError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|source| DumpError::Content {
            name: name.to_owned(),
            source,
        })
}

fn parse_last_modified(name: &str, text: &str) -> Result<i64, DumpError> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| DumpError::LastModified {
            name: name.to_owned(),
            value: text.trim().to_owned(),
        })
}

fn eof(expected: &str) -> DumpError {
    DumpError::UnexpectedEof {
        expected: expected.to_owned(),
    }
}
