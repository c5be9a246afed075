//! 以 quick-xml 解析成可修改的元素樹，再原樣序列化回去。
//!
//! 專案檔中的空白、註解與 DOCTYPE 都會保留，
//! 只有被修改的元素內容會改變。

use crate::utils::error::{BatchError, Result};
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    Declaration(String),
    DocType(String),
    ProcessingInstruction(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.set_text(text);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, current)) => *current = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children().filter(move |element| element.name == name)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> + 'a {
        self.children_mut().filter(move |element| element.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children().find(|element| element.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children_mut().find(|element| element.name == name)
    }

    /// 依路徑往下找，例如 `["projectCrs", "spatialrefsys", "authid"]`
    pub fn find(&self, path: &[&str]) -> Option<&Element> {
        let mut current = self;
        for name in path {
            current = current.child(name)?;
        }
        Some(current)
    }

    pub fn get_or_create_child(&mut self, name: &str) -> &mut Element {
        let position = self
            .children
            .iter()
            .position(|node| matches!(node, Node::Element(element) if element.name == name));
        let position = match position {
            Some(position) => position,
            None => {
                self.children.push(Node::Element(Element::new(name)));
                self.children.len() - 1
            }
        };
        match &mut self.children[position] {
            Node::Element(element) => element,
            _ => unreachable!("position always points to an element"),
        }
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn remove_children_named(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|node| !matches!(node, Node::Element(element) if element.name == name));
        before - self.children.len()
    }

    /// 所有後代元素 (前序)，不含自己
    pub fn descendants(&self) -> Vec<&Element> {
        let mut found = Vec::new();
        for child in self.children() {
            found.push(child);
            found.extend(child.descendants());
        }
        found
    }

    pub fn descendants_named(&self, name: &str) -> Vec<&Element> {
        self.descendants()
            .into_iter()
            .filter(|element| element.name == name)
            .collect()
    }

    /// 對所有後代元素 (前序) 執行 `visit`
    pub fn for_each_descendant_mut<F: FnMut(&mut Element)>(&mut self, visit: &mut F) {
        for child in self.children_mut() {
            visit(child);
            child.for_each_descendant_mut(visit);
        }
    }

    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.children {
            match node {
                Node::Text(value) | Node::CData(value) => text.push_str(value),
                _ => {}
            }
        }
        text
    }

    pub fn set_text(&mut self, text: &str) {
        self.children.clear();
        if !text.is_empty() {
            self.children.push(Node::Text(text.to_string()));
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub prolog: Vec<Node>,
    pub root: Element,
    pub epilog: Vec<Node>,
}

impl Document {
    pub fn parse(content: &str) -> Result<Self> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(false);

        let mut prolog = Vec::new();
        let mut root: Option<Element> = None;
        let mut epilog = Vec::new();
        let mut stack: Vec<Element> = Vec::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|e| BatchError::xml(format!("byte {}", reader.buffer_position()), e))?;

            let node = match event {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                    continue;
                }
                Event::Empty(start) => Node::Element(element_from_start(&start)?),
                Event::End(_) => match stack.pop() {
                    Some(element) => Node::Element(element),
                    None => return Err(BatchError::xml("document", "unexpected closing tag")),
                },
                Event::Text(text) => {
                    let value = text.unescape().map_err(|e| BatchError::xml("text", e))?;
                    Node::Text(value.into_owned())
                }
                Event::CData(data) => Node::CData(String::from_utf8_lossy(&data).into_owned()),
                Event::Comment(comment) => {
                    Node::Comment(String::from_utf8_lossy(&comment).into_owned())
                }
                Event::Decl(decl) => Node::Declaration(String::from_utf8_lossy(&decl).into_owned()),
                Event::PI(pi) => {
                    Node::ProcessingInstruction(String::from_utf8_lossy(&pi).into_owned())
                }
                Event::DocType(doctype) => Node::DocType(
                    String::from_utf8_lossy(&doctype).trim_start().to_string(),
                ),
                Event::Eof => break,
                #[allow(unreachable_patterns)]
                _ => continue,
            };

            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
                continue;
            }

            match node {
                Node::Element(element) if root.is_none() => root = Some(element),
                Node::Element(element) => {
                    return Err(BatchError::xml(
                        "document",
                        format!("more than one root element (<{}>)", element.name),
                    ))
                }
                other if root.is_none() => prolog.push(other),
                other => epilog.push(other),
            }
        }

        if let Some(open) = stack.last() {
            return Err(BatchError::xml(
                "document",
                format!("element <{}> is never closed", open.name),
            ));
        }

        let root = root.ok_or_else(|| BatchError::xml("document", "no root element"))?;
        Ok(Self {
            prolog,
            root,
            epilog,
        })
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        for node in &self.prolog {
            write_node(&mut out, node);
        }
        write_element(&mut out, &self.root);
        for node in &self.epilog {
            write_node(&mut out, node);
        }
        out
    }
}

fn element_from_start(start: &BytesStart) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| BatchError::xml(&name, e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| BatchError::xml(&name, e))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn escape_attribute(value: &str) -> String {
    escape(value)
        .replace('\n', "&#xa;")
        .replace('\r', "&#xd;")
        .replace('\t', "&#x9;")
}

fn write_element(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attribute(value));
        out.push('"');
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        write_node(out, child);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Element(element) => write_element(out, element),
        Node::Text(text) => out.push_str(&partial_escape(text.as_str())),
        Node::CData(data) => {
            out.push_str("<![CDATA[");
            out.push_str(data);
            out.push_str("]]>");
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Declaration(decl) | Node::ProcessingInstruction(decl) => {
            out.push_str("<?");
            out.push_str(decl);
            out.push_str("?>");
        }
        Node::DocType(doctype) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype);
            out.push('>');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'>
<qgis version="3.28.4-Firenze" projectname="">
  <!-- layers -->
  <projectlayers>
    <maplayer type="vector">
      <id>roads_1</id>
      <datasource>dbname='gis' table="public"."roads" (geom)</datasource>
      <expr value="a &lt; 1&#xa;AND b"/>
    </maplayer>
  </projectlayers>
</qgis>
"#;

    #[test]
    fn test_parse_and_query() {
        let doc = Document::parse(PROJECT).unwrap();
        assert_eq!(doc.root.name, "qgis");
        assert_eq!(doc.root.attr("version"), Some("3.28.4-Firenze"));
        assert!(matches!(&doc.prolog[0], Node::DocType(d) if d.starts_with("qgis PUBLIC")));

        let datasource = doc
            .root
            .find(&["projectlayers", "maplayer", "datasource"])
            .unwrap();
        assert_eq!(datasource.text(), "dbname='gis' table=\"public\".\"roads\" (geom)");

        let expr = doc.root.descendants_named("expr");
        assert_eq!(expr[0].attr("value"), Some("a < 1\nAND b"));
    }

    #[test]
    fn test_serialize_roundtrip_keeps_structure() {
        let doc = Document::parse(PROJECT).unwrap();
        let xml = doc.to_xml_string();
        assert!(xml.starts_with("<!DOCTYPE qgis PUBLIC"));
        assert!(xml.contains("<!-- layers -->"));
        assert!(xml.contains("value=\"a &lt; 1&#xa;AND b\""));

        let reparsed = Document::parse(&xml).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_mutation_helpers() {
        let mut doc = Document::parse("<a><b x=\"1\"/><b x=\"2\"/><c>text</c></a>").unwrap();
        assert_eq!(doc.root.children_named("b").count(), 2);

        doc.root.get_or_create_child("d").set_attr("y", "3");
        doc.root.get_or_create_child("d").set_attr("y", "4");
        assert_eq!(doc.root.children_named("d").count(), 1);
        assert_eq!(doc.root.child("d").unwrap().attr("y"), Some("4"));

        assert_eq!(doc.root.remove_children_named("b"), 2);
        doc.root.child_mut("c").unwrap().set_text("new & improved");
        assert_eq!(
            doc.to_xml_string(),
            "<a><c>new &amp; improved</c><d y=\"4\"/></a>"
        );
    }

    #[test]
    fn test_for_each_descendant_mut() {
        let mut doc = Document::parse("<a><b><c/></b><c/></a>").unwrap();
        let mut count = 0;
        doc.root.for_each_descendant_mut(&mut |element| {
            if element.name == "c" {
                element.set_attr("seen", "1");
                count += 1;
            }
        });
        assert_eq!(count, 2);
        assert_eq!(doc.to_xml_string(), "<a><b><c seen=\"1\"/></b><c seen=\"1\"/></a>");
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(Document::parse("").is_err());
        assert!(Document::parse("<a><b></a>").is_err());
        assert!(Document::parse("<a>").is_err());
        assert!(Document::parse("<a/><b/>").is_err());
    }
}
