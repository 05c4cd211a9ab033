//! ---
//! rctl_section: "03-persistence-properties"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Property bags and CPF XML marshalling."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use r_ctl_expr::{Scope, Value};
use tracing::debug;

/// Value held by a [`Property`].
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// `boolean`
    Bool(bool),
    /// `char`
    Char(char),
    /// `long`
    Long(i32),
    /// `ulong`
    ULong(u32),
    /// `double`
    Double(f64),
    /// `string`
    String(String),
    /// Nested bag written as a `struct` element.
    Struct(PropertyBag),
    /// Nested bag written as a `sequence` element.
    Sequence(PropertyBag),
}

impl PropertyValue {
    /// CPF type attribute of a simple value, `None` for bags.
    pub fn cpf_type(&self) -> Option<&'static str> {
        match self {
            PropertyValue::Bool(_) => Some("boolean"),
            PropertyValue::Char(_) => Some("char"),
            PropertyValue::Long(_) => Some("long"),
            PropertyValue::ULong(_) => Some("ulong"),
            PropertyValue::Double(_) => Some("double"),
            PropertyValue::String(_) => Some("string"),
            PropertyValue::Struct(_) | PropertyValue::Sequence(_) => None,
        }
    }

    /// Script value of a simple property.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            PropertyValue::Bool(v) => Some(Value::Bool(*v)),
            PropertyValue::Char(v) => Some(Value::Char(*v)),
            PropertyValue::Long(v) => Some(Value::Int(i64::from(*v))),
            PropertyValue::ULong(v) => Some(Value::UInt(u64::from(*v))),
            PropertyValue::Double(v) => Some(Value::Double(*v)),
            PropertyValue::String(v) => Some(Value::String(v.clone())),
            PropertyValue::Struct(_) | PropertyValue::Sequence(_) => None,
        }
    }

    /// Store `value` if it has the same kind and fits the property's range.
    pub fn assign(&mut self, value: &Value) -> bool {
        match (self, value) {
            (PropertyValue::Bool(slot), Value::Bool(v)) => *slot = *v,
            (PropertyValue::Char(slot), Value::Char(v)) => *slot = *v,
            (PropertyValue::Long(slot), Value::Int(v)) => match i32::try_from(*v) {
                Ok(v) => *slot = v,
                Err(_) => return false,
            },
            (PropertyValue::ULong(slot), Value::UInt(v)) => match u32::try_from(*v) {
                Ok(v) => *slot = v,
                Err(_) => return false,
            },
            (PropertyValue::Double(slot), Value::Double(v)) => *slot = *v,
            (PropertyValue::String(slot), Value::String(v)) => slot.clone_from(v),
            _ => return false,
        }
        true
    }
}

/// A named, described value.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Property name; may be empty inside sequences.
    pub name: String,
    /// Free text description, omitted from the output when empty.
    pub description: String,
    /// Current value.
    pub value: PropertyValue,
}

impl Property {
    /// Property without a description.
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            value,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Ordered collection of properties with a type name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyBag {
    /// Type written in the `type` attribute of `struct`/`sequence`.
    pub type_name: String,
    /// Properties in document order.
    pub properties: Vec<Property>,
}

impl PropertyBag {
    /// Empty untyped bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty bag with a type name.
    pub fn typed(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: Vec::new(),
        }
    }

    /// Append a property. Duplicate names are kept; lookups return the first.
    pub fn add(&mut self, property: Property) -> &mut Self {
        self.properties.push(property);
        self
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// First property called `name`.
    pub fn find(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Mutable access to the first property called `name`.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Resolve a dotted path such as `gains.kp` through nested bags.
    pub fn find_path(&self, path: &str) -> Option<&Property> {
        let mut segments = path.split('.');
        let mut current = self.find(segments.next()?)?;
        for segment in segments {
            current = match &current.value {
                PropertyValue::Struct(bag) | PropertyValue::Sequence(bag) => bag.find(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// `true` when the bag holds no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterate the direct children in order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    /// Expose every simple property as a script variable.
    ///
    /// Nested properties are reachable under their dotted path; unnamed
    /// sequence elements use their index.
    pub fn to_scope(&self) -> Scope {
        let mut scope = Scope::new();
        self.fill_scope("", &mut scope);
        debug!(variables = scope.len(), "property bag exposed to scripts");
        scope
    }

    fn fill_scope(&self, prefix: &str, scope: &mut Scope) {
        for (idx, property) in self.properties.iter().enumerate() {
            let local = if property.name.is_empty() {
                idx.to_string()
            } else {
                property.name.clone()
            };
            let path = if prefix.is_empty() {
                local
            } else {
                format!("{prefix}.{local}")
            };
            match &property.value {
                PropertyValue::Struct(bag) | PropertyValue::Sequence(bag) => {
                    bag.fill_scope(&path, scope);
                }
                simple => {
                    if let Some(value) = simple.to_value() {
                        if !scope.contains(&path) {
                            scope.declare(path, value);
                        }
                    }
                }
            }
        }
    }

    /// Copy the current values of the scope's variables back into the bag.
    ///
    /// Returns how many properties were updated. Variables whose value no
    /// longer fits the property type are skipped.
    pub fn refresh_from_scope(&mut self, scope: &Scope) -> usize {
        self.refresh_with_prefix("", scope)
    }

    fn refresh_with_prefix(&mut self, prefix: &str, scope: &Scope) -> usize {
        let mut updated = 0;
        for (idx, property) in self.properties.iter_mut().enumerate() {
            let local = if property.name.is_empty() {
                idx.to_string()
            } else {
                property.name.clone()
            };
            let path = if prefix.is_empty() {
                local
            } else {
                format!("{prefix}.{local}")
            };
            match &mut property.value {
                PropertyValue::Struct(bag) | PropertyValue::Sequence(bag) => {
                    updated += bag.refresh_with_prefix(&path, scope);
                }
                simple => {
                    if let Some(variable) = scope.variable(&path) {
                        if simple.assign(&variable.get()) {
                            updated += 1;
                        }
                    }
                }
            }
        }
        updated
    }
}
