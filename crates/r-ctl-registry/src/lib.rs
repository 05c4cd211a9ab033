//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Name-based registry for runtime objects."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Name-based lookup tables shared by the expression, execution, and daemon
//! crates.

pub mod name_server;

pub use name_server::NameServer;
