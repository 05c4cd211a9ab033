//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Name-based registry for runtime objects."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use indexmap::IndexMap;
use tracing::debug;

/// Maps names to registered objects.
///
/// The first registration for a name wins; registering the same name again
/// is a no-op. Iteration follows registration order and stays stable across
/// removals.
#[derive(Debug, Clone)]
pub struct NameServer<V> {
    objects: IndexMap<String, V>,
}

impl<V> Default for NameServer<V> {
    fn default() -> Self {
        Self {
            objects: IndexMap::new(),
        }
    }
}

impl<V> NameServer<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `obj` under `name`. Returns `false` when the name was taken.
    pub fn register_object(&mut self, obj: V, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.objects.contains_key(&name) {
            debug!(name = %name, "name already registered; keeping first registration");
            return false;
        }
        self.objects.insert(name, obj);
        true
    }

    pub fn is_name_registered(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn get_object(&self, name: &str) -> Option<&V> {
        self.objects.get(name)
    }

    pub fn get_object_mut(&mut self, name: &str) -> Option<&mut V> {
        self.objects.get_mut(name)
    }

    /// Remove the entry registered under `name`, returning its object.
    pub fn unregister_name(&mut self, name: &str) -> Option<V> {
        self.objects.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn objects(&self) -> impl Iterator<Item = &V> {
        self.objects.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.objects.iter().map(|(name, obj)| (name.as_str(), obj))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<V: PartialEq> NameServer<V> {
    pub fn is_object_registered(&self, obj: &V) -> bool {
        self.objects.values().any(|candidate| candidate == obj)
    }

    /// Reverse lookup: the first name bound to `obj`.
    pub fn get_name(&self, obj: &V) -> Option<&str> {
        self.objects
            .iter()
            .find(|(_, candidate)| *candidate == obj)
            .map(|(name, _)| name.as_str())
    }

    /// Remove every name bound to `obj`. Returns how many entries were dropped.
    pub fn unregister_object(&mut self, obj: &V) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, candidate| candidate != obj);
        before - self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_wins() {
        let mut server = NameServer::new();
        assert!(server.register_object(1, "motor"));
        assert!(!server.register_object(2, "motor"));
        assert_eq!(server.get_object("motor"), Some(&1));
        assert_eq!(server.len(), 1);
    }

    #[test]
    fn reverse_lookup_and_object_removal() {
        let mut server = NameServer::new();
        server.register_object("a", "first");
        server.register_object("b", "second");
        server.register_object("a", "alias");
        assert_eq!(server.get_name(&"a"), Some("first"));
        assert!(server.is_object_registered(&"b"));
        assert_eq!(server.unregister_object(&"a"), 2);
        assert!(!server.is_name_registered("first"));
        assert!(!server.is_name_registered("alias"));
        assert_eq!(server.names().collect::<Vec<_>>(), vec!["second"]);
    }

    #[test]
    fn iteration_order_is_stable_after_removal() {
        let mut server = NameServer::new();
        for (idx, name) in ["x", "y", "z"].iter().enumerate() {
            server.register_object(idx, *name);
        }
        server.unregister_name("y");
        assert_eq!(server.names().collect::<Vec<_>>(), vec!["x", "z"]);
        assert_eq!(server.objects().copied().collect::<Vec<_>>(), vec![0, 2]);
    }
}
