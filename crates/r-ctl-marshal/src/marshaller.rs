//! ---
//! rctl_section: "03-persistence-properties"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Property bags and CPF XML marshalling."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::borrow::Cow;
use std::io::Write;

use crate::dtd::CPF_DTD_FILE;
use crate::property::{Property, PropertyBag, PropertyValue};
use crate::Result;

const INDENT: &str = "   ";

/// Writes property bags as CPF documents.
pub struct CpfMarshaller<W: Write> {
    out: W,
    indent: String,
}

impl<W: Write> CpfMarshaller<W> {
    /// Marshaller writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            indent: String::from("  "),
        }
    }

    /// Write a complete document: prolog, `DOCTYPE` and `<properties>`.
    pub fn serialize(&mut self, bag: &PropertyBag) -> Result<()> {
        writeln!(self.out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(self.out, r#"<!DOCTYPE properties SYSTEM "{CPF_DTD_FILE}">"#)?;
        writeln!(self.out, "<properties>")?;
        self.write_children(bag)?;
        writeln!(self.out, "</properties>")?;
        Ok(())
    }

    /// Write a single property element without the document wrapper.
    pub fn serialize_property(&mut self, property: &Property) -> Result<()> {
        match &property.value {
            PropertyValue::Struct(bag) => self.write_bag("struct", property, bag),
            PropertyValue::Sequence(bag) => self.write_bag("sequence", property, bag),
            PropertyValue::Bool(v) => self.write_simple(property, if *v { "1" } else { "0" }),
            PropertyValue::Char(v) => self.write_simple(property, &escape(&v.to_string())),
            PropertyValue::Long(v) => self.write_simple(property, &v.to_string()),
            PropertyValue::ULong(v) => self.write_simple(property, &v.to_string()),
            PropertyValue::Double(v) => self.write_simple(property, &v.to_string()),
            PropertyValue::String(v) => self.write_simple(property, &escape(v)),
        }
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_children(&mut self, bag: &PropertyBag) -> Result<()> {
        for property in &bag.properties {
            self.serialize_property(property)?;
        }
        Ok(())
    }

    fn write_simple(&mut self, property: &Property, value: &str) -> Result<()> {
        let type_name = property.value.cpf_type().unwrap_or("string");
        write!(
            self.out,
            r#"{}<simple name="{}" type="{}">"#,
            self.indent,
            escape_attr(&property.name),
            type_name
        )?;
        if !property.description.is_empty() {
            write!(
                self.out,
                "<description>{}</description>",
                escape(&property.description)
            )?;
        }
        writeln!(self.out, "<value>{value}</value></simple>")?;
        Ok(())
    }

    fn write_bag(&mut self, element: &str, property: &Property, bag: &PropertyBag) -> Result<()> {
        writeln!(
            self.out,
            r#"{}<{element} name="{}" type="{}">"#,
            self.indent,
            escape_attr(&property.name),
            escape_attr(&bag.type_name)
        )?;
        self.indent.push_str(INDENT);
        if !property.description.is_empty() {
            writeln!(
                self.out,
                "{}<description>{}</description>",
                self.indent,
                escape(&property.description)
            )?;
        }
        self.write_children(bag)?;
        self.indent.truncate(self.indent.len() - INDENT.len());
        writeln!(self.out, "{}</{element}>", self.indent)?;
        Ok(())
    }
}

/// Render `bag` into an in-memory document.
pub fn to_cpf_string(bag: &PropertyBag) -> Result<String> {
    let mut marshaller = CpfMarshaller::new(Vec::new());
    marshaller.serialize(bag)?;
    Ok(String::from_utf8_lossy(&marshaller.into_inner()).into_owned())
}

/// Escape character data. `&` is replaced first so existing entities are
/// not reinterpreted.
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(|c: char| matches!(c, '&' | '<' | '>')) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Escape an attribute value; double quotes delimit attributes.
pub fn escape_attr(text: &str) -> Cow<'_, str> {
    let escaped = escape(text);
    if !escaped.contains('"') {
        return escaped;
    }
    Cow::Owned(escaped.replace('"', "&quot;"))
}
