//! Streaming dump serialiser.

use std::io::Write;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use quick_xml::escape::escape;

use super::{CHILDREN, CONTENT, IS_COLLECTION_ATTR, LAST_MODIFIED, NAME_ATTR, RESOURCE, VERSION};
use crate::error::DumpError;
use crate::types::DumpNode;

/// Writes `<resource>` elements to any [`Write`] sink, indenting by depth.
///
/// Callers pair `start_resource`/`end_resource` and
/// `start_children`/`end_children` themselves; the writer only tracks depth.
pub struct DumpWriter<W: Write> {
    out: W,
    depth: usize,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, depth: 0 }
    }

    pub fn write_declaration(&mut self) -> Result<(), DumpError> {
        writeln!(self.out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        Ok(())
    }

    /// Open a `<resource>` element and write its header elements.
    pub fn start_resource(&mut self, node: &DumpNode) -> Result<(), DumpError> {
        self.indent()?;
        write!(
            self.out,
            r#"<{RESOURCE} {NAME_ATTR}="{}" {IS_COLLECTION_ATTR}="{}""#,
            escape(node.name.as_str()),
            node.is_collection
        )?;
        for (key, value) in &node.attributes {
            write!(self.out, r#" {key}="{}""#, escape(value.as_str()))?;
        }
        writeln!(self.out, ">")?;

        self.depth += 1;
        if let Some(version) = &node.version {
            self.text_element(VERSION, version)?;
        }
        if let Some(ms) = node.last_modified {
            self.text_element(LAST_MODIFIED, &ms.to_string())?;
        }
        for (key, value) in &node.fields {
            self.text_element(key, value)?;
        }
        if let Some(content) = &node.content {
            self.text_element(CONTENT, &STANDARD.encode(content))?;
        }
        Ok(())
    }

    pub fn start_children(&mut self) -> Result<(), DumpError> {
        self.indent()?;
        writeln!(self.out, "<{CHILDREN}>")?;
        self.depth += 1;
        Ok(())
    }

    pub fn end_children(&mut self) -> Result<(), DumpError> {
        self.depth = self.depth.saturating_sub(1);
        self.indent()?;
        writeln!(self.out, "</{CHILDREN}>")?;
        Ok(())
    }

    pub fn end_resource(&mut self) -> Result<(), DumpError> {
        self.depth = self.depth.saturating_sub(1);
        self.indent()?;
        writeln!(self.out, "</{RESOURCE}>")?;
        Ok(())
    }

    /// A complete node with no children block.
    pub fn leaf(&mut self, node: &DumpNode) -> Result<(), DumpError> {
        self.start_resource(node)?;
        self.end_resource()
    }

    pub fn flush(&mut self) -> Result<(), DumpError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), DumpError> {
        self.indent()?;
        writeln!(self.out, "<{name}>{}</{name}>", escape(text))?;
        Ok(())
    }

    fn indent(&mut self) -> Result<(), DumpError> {
        write!(self.out, "{:width$}", "", width = self.depth * 2)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::{ChildrenBlock, DumpReader};

    #[test]
    fn escapes_names_and_metadata() {
        let mut node = DumpNode::resource("a<b>&c.txt", b"x".to_vec());
        node.fields.push(("description".into(), "1 < 2 & \"q\"".into()));
        let mut w = DumpWriter::new(Vec::new());
        w.leaf(&node).unwrap();
        let xml = String::from_utf8(w.into_inner()).unwrap();
        assert!(xml.contains("a&lt;b&gt;&amp;c.txt"), "got: {xml}");

        let mut r = DumpReader::new(xml.as_bytes());
        let back = r.read_node().unwrap().expect("node");
        assert_eq!(back.name, "a<b>&c.txt");
        assert_eq!(back.field("description"), Some("1 < 2 & \"q\""));
        assert_eq!(back.content.as_deref(), Some(b"x".as_slice()));
    }

    #[test]
    fn nested_output_reads_back_as_a_tree() {
        let mut root = DumpNode::collection("root");
        root.version = Some("5".into());
        let mut w = DumpWriter::new(Vec::new());
        w.write_declaration().unwrap();
        w.start_resource(&root).unwrap();
        w.start_children().unwrap();
        w.leaf(&DumpNode::resource("one", b"1".to_vec())).unwrap();
        w.end_children().unwrap();
        w.end_resource().unwrap();
        let xml = w.into_inner();

        let mut r = DumpReader::new(xml.as_slice());
        let back = r.read_node().unwrap().expect("root");
        assert_eq!(back.version.as_deref(), Some("5"));
        assert_eq!(r.open_children().unwrap(), ChildrenBlock::Entries);
        assert!(r.next_child().unwrap());
        assert_eq!(r.read_node().unwrap().expect("child").name, "one");
        r.close_node().unwrap();
        assert!(!r.next_child().unwrap());
    }
}
