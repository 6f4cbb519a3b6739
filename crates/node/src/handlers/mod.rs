//! Handler fuer alle Requests
//!
//! Jeder Handler ist fuer eine Gruppe von Requests zustaendig und hat
//! Zugriff auf die Verbindung und den gemeinsamen NodeState.

pub mod conversation_handler;
pub mod node_handler;
pub mod profile_handler;
pub mod relay_handler;
