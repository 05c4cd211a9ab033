//! ---
//! rctl_section: "03-persistence-properties"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Property bags and CPF XML marshalling."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Component property persistence.
//!
//! A [`PropertyBag`] is written to and read from the component property
//! format (CPF), a small XML dialect with `simple`, `struct` and `sequence`
//! elements.

use std::path::PathBuf;

/// Result alias used throughout the marshalling crate.
pub type Result<T> = std::result::Result<T, MarshalError>;

/// Error type for property marshalling.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    /// Failure while writing to the output stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failure opening or creating a property file.
    #[error("property file {path}: {source}")]
    File {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not well-formed.
    #[error("malformed property document:\n{0}")]
    Syntax(String),
    /// An element appeared where the format does not allow it.
    #[error("unexpected <{element}> inside <{parent}>")]
    UnexpectedElement {
        /// Element found.
        element: String,
        /// Enclosing element.
        parent: String,
    },
    /// A required attribute is absent.
    #[error("<{element}> is missing the '{attribute}' attribute")]
    MissingAttribute {
        /// Element lacking the attribute.
        element: String,
        /// Attribute name.
        attribute: &'static str,
    },
    /// A `simple` element without a `value` child.
    #[error("property '{name}' has no value")]
    MissingValue {
        /// Property name.
        name: String,
    },
    /// The value text does not parse as the declared type.
    #[error("property '{name}': '{value}' is not a valid {type_name}")]
    InvalidValue {
        /// Property name.
        name: String,
        /// Declared CPF type.
        type_name: String,
        /// Raw value text.
        value: String,
    },
    /// A CPF type this implementation does not map to a property value.
    #[error("property '{name}' has unsupported type '{type_name}'")]
    UnsupportedType {
        /// Property name.
        name: String,
        /// Declared CPF type.
        type_name: String,
    },
}

pub mod demarshaller;
pub mod dtd;
pub mod file;
pub mod marshaller;
pub mod property;

pub use demarshaller::CpfDemarshaller;
pub use dtd::CPF_DTD;
pub use file::{read_cpf_file, write_cpf_file};
pub use marshaller::{to_cpf_string, CpfMarshaller};
pub use property::{Property, PropertyBag, PropertyValue};
