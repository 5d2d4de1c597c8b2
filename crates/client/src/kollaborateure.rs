//! Kollaborateur-Traits des Orchestrators
//!
//! Der Orchestrator spricht Medienzugriff und Peer-Verbindung nie direkt
//! an, sondern ueber diese Traits. Die konkreten Implementierungen
//! (Kamera/Mikrofon, WebRTC-artiger Peer-Link) liefert die einbettende
//! Anwendung; die Tests verwenden Attrappen.

use sichtruf_protocol::signal::SignalBlob;
use tokio::sync::mpsc;

use crate::error::KlientResult;

// ---------------------------------------------------------------------------
// Medien
// ---------------------------------------------------------------------------

/// Gewuenschte Medienarten beim Anfordern des lokalen Streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MedienVorgaben {
    pub video: bool,
    pub audio: bool,
}

impl Default for MedienVorgaben {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Opakes Handle auf einen Medienstrom
///
/// Der Orchestrator inspiziert den Inhalt nie, er reicht das Handle nur
/// zwischen Medienquelle, Peer-Link und Oberflaeche weiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedienStream {
    pub kennung: String,
}

impl MedienStream {
    pub fn neu(kennung: impl Into<String>) -> Self {
        Self {
            kennung: kennung.into(),
        }
    }
}

/// Quelle fuer den lokalen Medienstrom (Kamera/Mikrofon)
///
/// Der Orchestrator fordert den Stream beim ersten Anruf an und haelt
/// ihn danach ueber Anrufgrenzen hinweg am Leben.
#[allow(async_fn_in_trait)]
pub trait MedienQuelle: Send + Sync {
    async fn anfordern(&self, vorgaben: MedienVorgaben) -> KlientResult<MedienStream>;
}

// ---------------------------------------------------------------------------
// Peer-Link
// ---------------------------------------------------------------------------

/// Ereignisse eines Peer-Links
///
/// Der Link meldet sie asynchron ueber eine mpsc-Queue; der Orchestrator
/// stempelt beim Erstellen die Anruf-Generation dazu, damit verspaetete
/// Ereignisse eines frueheren Links verworfen werden koennen.
#[derive(Debug, Clone)]
pub enum PeerLinkEreignis {
    /// Lokales Signal (Offer bzw. Answer) ist bereit zum Versand
    SignalBereit(SignalBlob),
    /// Medienstrom der Gegenstelle ist eingetroffen
    RemoteStream(MedienStream),
    /// Link-Aufbau fehlgeschlagen oder Link abgerissen
    Fehlgeschlagen(String),
}

/// Eine direkte Peer-Verbindung fuer einen einzelnen Anruf
#[allow(async_fn_in_trait)]
pub trait PeerLink: Send {
    /// Entgegengesetztes Signal (Offer bzw. Answer) einspielen
    async fn signal_anwenden(&mut self, signal: SignalBlob) -> KlientResult<()>;

    /// Link schliessen und Ressourcen freigeben
    async fn schliessen(&mut self);
}

/// Fabrik fuer Peer-Links
///
/// `initiator = true` erzeugt einen Link, der von sich aus ein Offer
/// produziert; `false` einen Link, der auf das eingespielte Offer mit
/// einem Answer reagiert. Beide melden das Ergebnis als
/// [`PeerLinkEreignis::SignalBereit`] ueber `ereignis_tx`.
#[allow(async_fn_in_trait)]
pub trait PeerLinkFabrik: Send + Sync {
    type Link: PeerLink;

    async fn erstellen(
        &self,
        initiator: bool,
        lokaler_stream: MedienStream,
        ereignis_tx: mpsc::Sender<PeerLinkEreignis>,
    ) -> KlientResult<Self::Link>;
}

// ---------------------------------------------------------------------------
// Token-Speicher
// ---------------------------------------------------------------------------

/// Persistenz fuer den Session-Token
///
/// Ein fehlender oder unlesbarer Token ist kein Fehler – der Vermittler
/// praegt dann eine frische Identitaet.
#[allow(async_fn_in_trait)]
pub trait TokenSpeicher: Send + Sync {
    async fn laden(&self) -> Option<String>;
    async fn speichern(&self, token: &str) -> KlientResult<()>;
}

/// Token-Speicher ohne Persistenz (jede Sitzung erhaelt eine frische
/// Identitaet)
#[derive(Debug, Default, Clone)]
pub struct FluechtigerSpeicher;

impl TokenSpeicher for FluechtigerSpeicher {
    async fn laden(&self) -> Option<String> {
        None
    }

    async fn speichern(&self, _token: &str) -> KlientResult<()> {
        Ok(())
    }
}

/// Dateibasierter Token-Speicher
///
/// Legt den Token als einzelne Zeile in einer Datei ab.
#[derive(Debug, Clone)]
pub struct DateiSpeicher {
    pfad: std::path::PathBuf,
}

impl DateiSpeicher {
    pub fn neu(pfad: impl Into<std::path::PathBuf>) -> Self {
        Self { pfad: pfad.into() }
    }
}

impl TokenSpeicher for DateiSpeicher {
    async fn laden(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.pfad).await {
            Ok(inhalt) => {
                let token = inhalt.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) => {
                tracing::debug!(pfad = %self.pfad.display(), fehler = %e, "Kein persistierter Token");
                None
            }
        }
    }

    async fn speichern(&self, token: &str) -> KlientResult<()> {
        if let Some(eltern) = self.pfad.parent() {
            tokio::fs::create_dir_all(eltern)
                .await
                .map_err(|e| crate::error::KlientFehler::Speicher(e.to_string()))?;
        }
        tokio::fs::write(&self.pfad, token)
            .await
            .map_err(|e| crate::error::KlientFehler::Speicher(e.to_string()))?;
        tracing::debug!(pfad = %self.pfad.display(), "Token persistiert");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fluechtiger_speicher_liefert_nie_token() {
        let speicher = FluechtigerSpeicher;
        speicher.speichern("abc").await.unwrap();
        assert!(speicher.laden().await.is_none());
    }

    #[tokio::test]
    async fn datei_speicher_roundtrip() {
        let dir = std::env::temp_dir().join(format!("sichtruf-test-{}", uuid::Uuid::new_v4()));
        let speicher = DateiSpeicher::neu(dir.join("token"));

        assert!(speicher.laden().await.is_none(), "Noch kein Token");

        speicher.speichern("mein-token").await.unwrap();
        assert_eq!(speicher.laden().await.as_deref(), Some("mein-token"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
