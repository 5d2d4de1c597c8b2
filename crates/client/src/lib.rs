//! sichtruf-client – Client-Laufzeit
//!
//! Dieser Crate enthaelt die UI-unabhaengige Anruf-Logik eines
//! Sichtruf-Clients: die Anruf-Zustandsmaschine, den Orchestrator mit
//! seiner sequenziellen Ereignisschleife und die TCP-Verbindung zum
//! Vermittler. Medienzugriff und Peer-Verbindung sind ueber die
//! Kollaborateur-Traits abstrahiert – die einbettende Anwendung liefert
//! die konkreten Implementierungen.
//!
//! ## Aufbau einer Sitzung
//!
//! ```text
//! VermittlerVerbindung::verbinden   (Hello -> Identity, Token persistieren)
//!          |
//!          v
//! AnrufOrchestrator::neu            (Maschine, Medien, Peer-Link-Fabrik)
//!          |
//!  verbindung.starten(ereignis_tx)  (Lese-Task speist die Queue)
//!          |
//!          v
//! orchestrator.ausfuehren().await   (sequenzielle Ereignisschleife)
//! ```

pub mod anruf;
pub mod error;
pub mod kollaborateure;
pub mod orchestrator;
pub mod verbindung;

// Bequeme Re-Exporte
pub use anruf::{AnrufKontext, AnrufMaschine, AnrufRichtung, AnrufZustand};
pub use error::{KlientFehler, KlientResult};
pub use kollaborateure::{
    DateiSpeicher, FluechtigerSpeicher, MedienQuelle, MedienStream, MedienVorgaben, PeerLink,
    PeerLinkEreignis, PeerLinkFabrik, TokenSpeicher,
};
pub use orchestrator::{
    AnrufOrchestrator, BenutzerHinweis, LokaleAbsicht, OrchestratorConfig, OrchestratorEreignis,
};
pub use verbindung::VermittlerVerbindung;
