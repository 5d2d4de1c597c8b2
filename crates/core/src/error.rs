//! Fehlertypen fuer Sichtruf
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Untermodule koennen eigene Fehler definieren und via `#[from]` konvertieren.

use thiserror::Error;

use crate::types::SessionToken;

/// Globaler Result-Alias fuer Sichtruf
pub type Result<T> = std::result::Result<T, SichtrufError>;

/// Alle moeglichen Fehler im Sichtruf-System
#[derive(Debug, Error)]
pub enum SichtrufError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    // --- Vermittlung ---
    #[error("Gegenstelle nicht erreichbar: {0}")]
    PartnerNichtErreichbar(SessionToken),

    #[error("Session wurde von einer neueren Verbindung verdraengt")]
    SessionVerdraengt,

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Medien & Peer-Link (clientseitig) ---
    #[error("Medienzugriff fehlgeschlagen: {0}")]
    Medien(String),

    #[error("Peer-Link-Fehler: {0}")]
    PeerLink(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SichtrufError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Verbindung(_) | Self::Getrennt(_))
    }
}
