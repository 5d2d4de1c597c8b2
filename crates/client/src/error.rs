//! Fehlertypen der Client-Laufzeit

use sichtruf_protocol::signal::ErrorCode;
use thiserror::Error;

/// Result-Alias fuer die Client-Laufzeit
pub type KlientResult<T> = std::result::Result<T, KlientFehler>;

/// Fehler die in der Client-Laufzeit auftreten koennen
#[derive(Debug, Error)]
pub enum KlientFehler {
    /// TCP-Verbindung fehlgeschlagen
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Vermittler hat mit Fehler geantwortet
    #[error("Vermittler-Fehler ({code:?}): {message}")]
    Vermittler { code: ErrorCode, message: String },

    /// Unerwartete Antwort vom Vermittler
    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(String),

    /// Verbindung wurde vom Vermittler getrennt
    #[error("Verbindung getrennt")]
    Getrennt,

    /// Medienzugriff fehlgeschlagen (Kamera/Mikrofon)
    #[error("Medienzugriff fehlgeschlagen: {0}")]
    Medien(String),

    /// Peer-Link konnte nicht aufgebaut werden
    #[error("Peer-Link-Fehler: {0}")]
    PeerLink(String),

    /// Token-Speicher nicht lesbar/schreibbar
    #[error("Token-Speicher: {0}")]
    Speicher(String),
}
