//! ---
//! rctl_section: "03-persistence-properties"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Property bags and CPF XML marshalling."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! CPF reader.
//!
//! Parsing happens in two passes: a nom grammar for the XML subset CPF
//! uses builds a borrowed element tree, which is then mapped onto
//! [`PropertyBag`]s with per-element checks.

use std::borrow::Cow;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{eof, map, opt, value},
    error::{context, convert_error, VerboseError},
    multi::many0,
    sequence::{delimited, preceded, separated_pair, tuple},
    Finish, IResult,
};
use tracing::{debug, warn};

use crate::property::{Property, PropertyBag, PropertyValue};
use crate::{MarshalError, Result};

type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Debug)]
struct Element<'a> {
    name: &'a str,
    attributes: Vec<(&'a str, &'a str)>,
    children: Vec<Element<'a>>,
    text: Vec<&'a str>,
}

impl<'a> Element<'a> {
    fn attribute(&self, key: &str) -> Option<Cow<'a, str>> {
        self.attributes
            .iter()
            .find(|(name, _)| *name == key)
            .map(|&(_, raw)| unescape(raw))
    }

    fn text(&self) -> String {
        unescape(&self.text.concat()).into_owned()
    }

    fn child(&self, name: &str) -> Option<&Element<'a>> {
        self.children.iter().find(|child| child.name == name)
    }
}

enum Content<'a> {
    Element(Element<'a>),
    Text(&'a str),
    Skip,
}

fn comment(input: &str) -> ParserResult<&str> {
    context(
        "comment",
        delimited(tag("<!--"), take_until("-->"), tag("-->")),
    )(input)
}

fn misc(input: &str) -> ParserResult<()> {
    value((), many0(alt((multispace1, comment))))(input)
}

fn xml_declaration(input: &str) -> ParserResult<()> {
    context(
        "xml declaration",
        value((), tuple((tag("<?xml"), take_until("?>"), tag("?>")))),
    )(input)
}

fn doctype(input: &str) -> ParserResult<()> {
    context(
        "doctype",
        value((), tuple((tag("<!DOCTYPE"), take_until(">"), char('>')))),
    )(input)
}

fn xml_name(input: &str) -> ParserResult<&str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))(input)
}

fn attribute(input: &str) -> ParserResult<(&str, &str)> {
    context(
        "attribute",
        separated_pair(
            xml_name,
            tuple((multispace0, char('='), multispace0)),
            alt((
                delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
                delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
            )),
        ),
    )(input)
}

fn content(input: &str) -> ParserResult<Content> {
    alt((
        map(comment, |_| Content::Skip),
        map(element, Content::Element),
        map(take_while1(|c: char| c != '<'), Content::Text),
    ))(input)
}

fn element(input: &str) -> ParserResult<Element> {
    let (input, _) = char('<')(input)?;
    let (input, name) = context("element name", xml_name)(input)?;
    let (input, attributes) = many0(preceded(multispace1, attribute))(input)?;
    let (input, _) = multispace0(input)?;
    let mut node = Element {
        name,
        attributes,
        children: Vec::new(),
        text: Vec::new(),
    };
    if let Ok((rest, _)) = tag::<_, _, VerboseError<&str>>("/>")(input) {
        return Ok((rest, node));
    }
    let (input, _) = char('>')(input)?;
    let (input, items) = many0(content)(input)?;
    let (input, _) = context(
        "closing tag",
        tuple((tag("</"), tag(name), multispace0, char('>'))),
    )(input)?;
    for item in items {
        match item {
            Content::Element(child) => node.children.push(child),
            Content::Text(text) => node.text.push(text),
            Content::Skip => {}
        }
    }
    Ok((input, node))
}

fn document(input: &str) -> ParserResult<Element> {
    delimited(
        tuple((misc, opt(xml_declaration), misc, opt(doctype), misc)),
        context("root element", element),
        tuple((misc, eof)),
    )(input)
}

/// Replace the predefined XML entities and numeric character references.
/// Unknown entities are kept verbatim.
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = tail
            .find(';')
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let number = name.strip_prefix('#')?;
            let hex = number
                .strip_prefix('x')
                .or_else(|| number.strip_prefix('X'));
            let code = match hex {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Reads CPF documents into property bags.
#[derive(Debug, Clone, Copy)]
pub struct CpfDemarshaller {
    strict: bool,
}

impl Default for CpfDemarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl CpfDemarshaller {
    /// Demarshaller rejecting elements the format does not define.
    pub fn new() -> Self {
        Self { strict: true }
    }

    /// Demarshaller that skips unknown elements with a warning.
    pub fn lenient() -> Self {
        Self { strict: false }
    }

    /// Parse a complete document.
    pub fn deserialize(&self, text: &str) -> Result<PropertyBag> {
        let text = text.trim_start_matches('\u{feff}');
        let (_, root) = document(text)
            .finish()
            .map_err(|err| MarshalError::Syntax(convert_error(text, err)))?;
        if root.name != "properties" {
            return Err(MarshalError::UnexpectedElement {
                element: root.name.to_owned(),
                parent: "document".to_owned(),
            });
        }
        let mut bag = PropertyBag::new();
        self.read_items(&root, &mut bag)?;
        debug!(properties = bag.len(), "property document parsed");
        Ok(bag)
    }

    fn read_items(&self, parent: &Element<'_>, bag: &mut PropertyBag) -> Result<()> {
        for child in &parent.children {
            match child.name {
                "description" => {}
                "simple" => {
                    bag.add(self.read_simple(child)?);
                }
                "struct" => {
                    let (property, inner) = self.read_bag(child)?;
                    bag.add(Property {
                        value: PropertyValue::Struct(inner),
                        ..property
                    });
                }
                "sequence" => {
                    let (property, inner) = self.read_bag(child)?;
                    bag.add(Property {
                        value: PropertyValue::Sequence(inner),
                        ..property
                    });
                }
                other => self.unexpected(other, parent.name)?,
            }
        }
        Ok(())
    }

    fn read_bag(&self, node: &Element<'_>) -> Result<(Property, PropertyBag)> {
        let type_name = node
            .attribute("type")
            .ok_or_else(|| MarshalError::MissingAttribute {
                element: node.name.to_owned(),
                attribute: "type",
            })?;
        let mut inner = PropertyBag::typed(type_name.into_owned());
        self.read_items(node, &mut inner)?;
        let property = Property {
            name: node.attribute("name").unwrap_or_default().into_owned(),
            description: node.child("description").map(Element::text).unwrap_or_default(),
            value: PropertyValue::Bool(false),
        };
        Ok((property, inner))
    }

    fn read_simple(&self, node: &Element<'_>) -> Result<Property> {
        let name = node.attribute("name").unwrap_or_default().into_owned();
        let type_name = node
            .attribute("type")
            .ok_or_else(|| MarshalError::MissingAttribute {
                element: "simple".to_owned(),
                attribute: "type",
            })?;
        let mut description = String::new();
        let mut raw_value = None;
        for child in &node.children {
            match child.name {
                "description" => description = child.text(),
                "value" => raw_value = Some(child.text()),
                "choices" | "defaultvalue" => {}
                other => self.unexpected(other, "simple")?,
            }
        }
        let raw_value = raw_value.ok_or_else(|| MarshalError::MissingValue { name: name.clone() })?;
        let value = parse_simple(&name, &type_name, raw_value)?;
        Ok(Property {
            name,
            description,
            value,
        })
    }

    fn unexpected(&self, element: &str, parent: &str) -> Result<()> {
        if self.strict {
            return Err(MarshalError::UnexpectedElement {
                element: element.to_owned(),
                parent: parent.to_owned(),
            });
        }
        warn!(element, parent, "skipping unknown property element");
        Ok(())
    }
}

fn parse_simple(name: &str, type_name: &str, raw: String) -> Result<PropertyValue> {
    let invalid = |raw: &str| MarshalError::InvalidValue {
        name: name.to_owned(),
        type_name: type_name.to_owned(),
        value: raw.to_owned(),
    };
    let value = match type_name {
        "boolean" => match raw.trim() {
            "1" | "true" => PropertyValue::Bool(true),
            "0" | "false" => PropertyValue::Bool(false),
            _ => return Err(invalid(&raw)),
        },
        "char" => {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => PropertyValue::Char(c),
                _ => return Err(invalid(&raw)),
            }
        }
        "long" | "short" => PropertyValue::Long(raw.trim().parse().map_err(|_| invalid(&raw))?),
        "ulong" | "ushort" | "octet" => {
            PropertyValue::ULong(raw.trim().parse().map_err(|_| invalid(&raw))?)
        }
        "double" | "float" => {
            PropertyValue::Double(raw.trim().parse().map_err(|_| invalid(&raw))?)
        }
        "string" => PropertyValue::String(raw),
        other => {
            return Err(MarshalError::UnsupportedType {
                name: name.to_owned(),
                type_name: other.to_owned(),
            })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_handles_named_and_numeric_entities() {
        assert_eq!(unescape("a &lt;b&gt; &amp;amp;"), "a <b> &amp;");
        assert_eq!(unescape("&quot;&apos;&#65;&#x42;"), "\"'AB");
        assert_eq!(unescape("fish & chips; &bogus;"), "fish & chips; &bogus;");
    }

    #[test]
    fn element_tree_keeps_text_and_children() {
        let (_, root) = element(r#"<simple name="a" type='long'><value> 4 </value><!-- x --></simple>"#)
            .unwrap();
        assert_eq!(root.name, "simple");
        assert_eq!(root.attribute("type").as_deref(), Some("long"));
        assert_eq!(root.child("value").map(Element::text).as_deref(), Some(" 4 "));
    }

    #[test]
    fn mismatched_closing_tag_is_a_syntax_error() {
        let err = CpfDemarshaller::new()
            .deserialize("<properties><simple type=\"long\"><value>1</value></struct></properties>")
            .unwrap_err();
        assert!(matches!(err, MarshalError::Syntax(_)));
    }

    #[test]
    fn lenient_mode_skips_unknown_elements() {
        let doc = r#"<properties><extra/><simple name="n" type="ulong"><value>7</value></simple></properties>"#;
        assert!(matches!(
            CpfDemarshaller::new().deserialize(doc),
            Err(MarshalError::UnexpectedElement { .. })
        ));
        let bag = CpfDemarshaller::lenient().deserialize(doc).unwrap();
        assert_eq!(bag.find("n").map(|p| &p.value), Some(&PropertyValue::ULong(7)));
    }
}
