//! ---
//! rctl_section: "03-persistence-properties"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Property bags and CPF XML marshalling."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---

/// Document type definition referenced by the `DOCTYPE` of every CPF file.
pub const CPF_DTD: &str = r#"<!ELEMENT properties (description? , (simple|sequence|struct)* )>
<!ELEMENT choice (#PCDATA)>
<!ELEMENT choices (choice+)>
<!ELEMENT defaultvalue (#PCDATA)>
<!ELEMENT description (#PCDATA)>
<!ELEMENT simple (description?, value, choices?, defaultvalue?)>
<!ATTLIST simple name CDATA #IMPLIED type (boolean|char|double|float|short|long|objref|octet|string|ulong|ushort) #REQUIRED>
<!ELEMENT sequence (description?, (simple*|struct*|sequence*))>
<!ATTLIST sequence name CDATA #IMPLIED type CDATA #REQUIRED>
<!ELEMENT struct (description?, (simple|sequence|struct)*)>
<!ATTLIST struct name CDATA #IMPLIED type CDATA #REQUIRED>
<!ELEMENT value (#PCDATA)>
"#;

/// File name the `DOCTYPE` points at.
pub const CPF_DTD_FILE: &str = "cpf.dtd";
