//! sichtruf-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Sichtruf-Crates gemeinsam genutzt werden: Session-Tokens,
//! Verbindungs-IDs und der zentrale Fehler-Enum.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, SichtrufError};
pub use types::{SessionToken, VerbindungsId};
