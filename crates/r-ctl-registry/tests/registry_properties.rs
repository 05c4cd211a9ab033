//! ---
//! rctl_section: "15-testing-qa-runbook"
//! rctl_subsection: "integration-tests"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Registry behaviour checks."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use r_ctl_registry::NameServer;

#[test]
fn names_are_registered_until_unregistered() {
    let mut server = NameServer::new();
    let names = ["start", "stop", "pause", "step"];
    for (idx, name) in names.iter().enumerate() {
        assert!(server.register_object(idx, *name));
        assert!(server.is_name_registered(name));
    }
    server.unregister_name("stop");
    assert!(!server.is_name_registered("stop"));
    server.unregister_object(&3);
    assert!(!server.is_name_registered("step"));
    assert!(server.is_name_registered("start"));
    assert!(server.is_name_registered("pause"));
}

#[test]
fn lookups_return_the_first_registered_object() {
    let mut server = NameServer::new();
    server.register_object(String::from("primary"), "engine");
    server.register_object(String::from("shadow"), "engine");
    assert_eq!(server.get_object("engine").map(String::as_str), Some("primary"));
    assert!(!server.is_object_registered(&String::from("shadow")));
    assert_eq!(server.get_name(&String::from("primary")), Some("engine"));
}

#[test]
fn unknown_names_resolve_to_nothing() {
    let server: NameServer<u8> = NameServer::default();
    assert!(server.get_object("missing").is_none());
    assert!(server.get_name(&7).is_none());
    assert!(server.is_empty());
}
