//! ---
//! rctl_section: "03-persistence-properties"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Property bags and CPF XML marshalling."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use tracing::info;

use crate::demarshaller::CpfDemarshaller;
use crate::marshaller::CpfMarshaller;
use crate::property::PropertyBag;
use crate::{MarshalError, Result};

/// Persist `bag` as a CPF document, creating parent directories as needed.
pub fn write_cpf_file(bag: &PropertyBag, path: &Path) -> Result<()> {
    let file_error = |source| MarshalError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(file_error)?;
        }
    }
    let writer = BufWriter::new(File::create(path).map_err(file_error)?);
    let mut marshaller = CpfMarshaller::new(writer);
    marshaller.serialize(bag)?;
    marshaller.flush()?;
    info!(path = %path.display(), properties = bag.len(), "property file written");
    Ok(())
}

/// Load a CPF document from disk.
pub fn read_cpf_file(path: &Path) -> Result<PropertyBag> {
    let text = fs::read_to_string(path).map_err(|source| MarshalError::File {
        path: path.to_path_buf(),
        source,
    })?;
    let bag = CpfDemarshaller::new().deserialize(&text)?;
    info!(path = %path.display(), properties = bag.len(), "property file loaded");
    Ok(bag)
}
