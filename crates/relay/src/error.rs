//! Fehlertypen fuer den Vermittlungs-Service

use sichtruf_core::types::SessionToken;
use thiserror::Error;

/// Fehlertyp fuer den Vermittlungs-Service
#[derive(Debug, Error)]
pub enum RelayFehler {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Fuer das Ziel ist keine lebende Verbindung registriert
    #[error("Gegenstelle nicht erreichbar: {0}")]
    PartnerNichtErreichbar(SessionToken),

    /// Senden an Client fehlgeschlagen (Queue voll oder geschlossen)
    #[error("Senden fehlgeschlagen: {0}")]
    SendFehler(SessionToken),

    /// Protokollfehler (ungueltiges Frame, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Server ist voll
    #[error("Server ist voll")]
    ServerVoll,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl RelayFehler {
    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer den Vermittlungs-Service
pub type RelayResult<T> = Result<T, RelayFehler>;
