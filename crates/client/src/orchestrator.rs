//! Anruf-Orchestrator
//!
//! Verbindet die Anruf-Zustandsmaschine mit den Kollaborateuren
//! (Medienquelle, Peer-Link-Fabrik) und dem Vermittler. Alle Ereignisse
//! laufen ueber eine einzige mpsc-Queue und werden sequenziell in der
//! Ereignisschleife verarbeitet – dadurch sind alle Zustandsuebergaenge
//! frei von Races, ohne dass die Maschine selbst gesperrt werden muss.
//!
//! ## Ereignisquellen
//! - Benutzerabsichten der Oberflaeche (`LokaleAbsicht`)
//! - Weitergeleitete Nachrichten des Vermittlers (`SignalPayload`)
//! - Asynchrone Peer-Link-Ereignisse, gestempelt mit der Anruf-Generation
//! - Klingel-Timeouts, ebenfalls generationsgestempelt
//!
//! Verspaetete Ereignisse einer frueheren Generation werden verworfen.

use sichtruf_core::types::SessionToken;
use sichtruf_protocol::signal::{
    AcceptCallRequest, CallUserRequest, EndCallRequest, RejectCallRequest, SignalNachricht,
    SignalPayload,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::anruf::{AnrufMaschine, AnrufRichtung, AnrufZustand};
use crate::kollaborateure::{
    MedienQuelle, MedienStream, MedienVorgaben, PeerLink, PeerLinkEreignis, PeerLinkFabrik,
};

// ---------------------------------------------------------------------------
// Ereignisse und Hinweise
// ---------------------------------------------------------------------------

/// Benutzerabsicht aus der Oberflaeche
#[derive(Debug, Clone)]
pub enum LokaleAbsicht {
    Anrufen { ziel: SessionToken },
    Annehmen,
    Ablehnen,
    Auflegen,
}

/// Ereignis in der Orchestrator-Queue
#[derive(Debug)]
pub enum OrchestratorEreignis {
    Lokal(LokaleAbsicht),
    /// Weitergeleitete Nachricht des Vermittlers
    Relay(SignalNachricht),
    /// Ereignis des aktiven (oder eines frueheren) Peer-Links
    PeerLink {
        generation: u64,
        ereignis: PeerLinkEreignis,
    },
    /// Klingel-Timeout eines ausgehenden oder eingehenden Anrufs
    KlingelTimeout { generation: u64 },
}

/// Hinweis an die Oberflaeche
#[derive(Debug, Clone)]
pub enum BenutzerHinweis {
    RosterAktualisiert(BTreeMap<SessionToken, String>),
    EingehenderAnruf {
        von: SessionToken,
        name: String,
    },
    /// Ausgehender Anruf wurde gestartet, Gegenstelle klingelt
    WaehltAn {
        ziel: SessionToken,
    },
    AnrufAngenommen,
    AnrufAbgelehnt,
    AnrufBeendet,
    PartnerNichtErreichbar {
        ziel: SessionToken,
    },
    RemoteStream(MedienStream),
    SessionVerdraengt,
    Fehler(String),
}

/// Konfiguration des Orchestrators
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub medien_vorgaben: MedienVorgaben,
    /// Zeit, die ein Anruf maximal klingelt (None = unbegrenzt)
    pub klingel_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            medien_vorgaben: MedienVorgaben::default(),
            klingel_timeout: Some(Duration::from_secs(45)),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Zentrale Ereignisschleife des Clients
///
/// Besitzt die Zustandsmaschine, den aktiven Peer-Link und den
/// zwischengespeicherten lokalen Medienstrom. Ausgehende Nachrichten an
/// den Vermittler gehen ueber `ausgang_tx` an die Verbindungs-Task.
pub struct AnrufOrchestrator<M, F>
where
    M: MedienQuelle,
    F: PeerLinkFabrik,
{
    eigener_token: SessionToken,
    medien: M,
    fabrik: F,
    config: OrchestratorConfig,

    maschine: AnrufMaschine,
    aktiver_link: Option<F::Link>,
    /// Lokaler Medienstrom, lebt ueber Anrufgrenzen hinweg
    lokaler_stream: Option<MedienStream>,
    roster: BTreeMap<SessionToken, String>,

    ereignis_tx: mpsc::Sender<OrchestratorEreignis>,
    ereignis_rx: mpsc::Receiver<OrchestratorEreignis>,
    ausgang_tx: mpsc::Sender<SignalNachricht>,
    hinweis_tx: mpsc::Sender<BenutzerHinweis>,
    naechste_request_id: u32,
}

impl<M, F> AnrufOrchestrator<M, F>
where
    M: MedienQuelle,
    F: PeerLinkFabrik,
{
    /// Erstellt einen neuen Orchestrator
    pub fn neu(
        eigener_token: SessionToken,
        medien: M,
        fabrik: F,
        config: OrchestratorConfig,
        ausgang_tx: mpsc::Sender<SignalNachricht>,
        hinweis_tx: mpsc::Sender<BenutzerHinweis>,
    ) -> Self {
        let (ereignis_tx, ereignis_rx) = mpsc::channel(64);
        Self {
            eigener_token,
            medien,
            fabrik,
            config,
            maschine: AnrufMaschine::neu(),
            aktiver_link: None,
            lokaler_stream: None,
            roster: BTreeMap::new(),
            ereignis_tx,
            ereignis_rx,
            ausgang_tx,
            hinweis_tx,
            naechste_request_id: 1,
        }
    }

    /// Sende-Ende der Ereignis-Queue (fuer Oberflaeche und Verbindungs-Task)
    pub fn ereignis_sender(&self) -> mpsc::Sender<OrchestratorEreignis> {
        self.ereignis_tx.clone()
    }

    pub fn zustand(&self) -> AnrufZustand {
        self.maschine.zustand()
    }

    pub fn roster(&self) -> &BTreeMap<SessionToken, String> {
        &self.roster
    }

    /// Fuehrt die Ereignisschleife aus
    ///
    /// Laeuft bis die Ereignis-Queue geschlossen wird oder die Session
    /// verdraengt wurde.
    pub async fn ausfuehren(mut self) {
        tracing::info!(token = %self.eigener_token, "Orchestrator gestartet");
        while let Some(ereignis) = self.ereignis_rx.recv().await {
            if !self.verarbeiten(ereignis).await {
                break;
            }
        }
        self.link_schliessen().await;
        tracing::info!("Orchestrator beendet");
    }

    /// Verarbeitet ein einzelnes Ereignis; `false` beendet die Schleife
    ///
    /// Fuer Tests auch direkt aufrufbar – so laesst sich jede Sequenz
    /// deterministisch durchspielen.
    pub async fn verarbeiten(&mut self, ereignis: OrchestratorEreignis) -> bool {
        match ereignis {
            OrchestratorEreignis::Lokal(absicht) => {
                self.lokale_absicht(absicht).await;
                true
            }
            OrchestratorEreignis::Relay(nachricht) => self.relay_nachricht(nachricht).await,
            OrchestratorEreignis::PeerLink {
                generation,
                ereignis,
            } => {
                self.peer_link_ereignis(generation, ereignis).await;
                true
            }
            OrchestratorEreignis::KlingelTimeout { generation } => {
                self.klingel_timeout(generation).await;
                true
            }
        }
    }

    // -----------------------------------------------------------------------
    // Benutzerabsichten
    // -----------------------------------------------------------------------

    async fn lokale_absicht(&mut self, absicht: LokaleAbsicht) {
        match absicht {
            LokaleAbsicht::Anrufen { ziel } => self.anrufen(ziel).await,
            LokaleAbsicht::Annehmen => self.annehmen().await,
            LokaleAbsicht::Ablehnen => {
                if let Some(partner) = self.maschine.ablehnen() {
                    self.senden(SignalPayload::RejectCall(RejectCallRequest { to: partner }))
                        .await;
                }
            }
            LokaleAbsicht::Auflegen => {
                if let Some(partner) = self.maschine.beenden() {
                    self.senden(SignalPayload::EndCall(EndCallRequest { to: partner }))
                        .await;
                    self.link_schliessen().await;
                    self.hinweis(BenutzerHinweis::AnrufBeendet).await;
                }
            }
        }
    }

    /// Startet einen ausgehenden Anruf
    ///
    /// Der eigentliche `CallUser` geht erst raus, wenn der Peer-Link das
    /// Offer gemeldet hat (siehe `peer_link_ereignis`).
    async fn anrufen(&mut self, ziel: SessionToken) {
        if self.maschine.ist_beschaeftigt() {
            self.hinweis(BenutzerHinweis::Fehler("Bereits in einem Anruf".into()))
                .await;
            return;
        }
        if !self.roster.contains_key(&ziel) {
            self.hinweis(BenutzerHinweis::PartnerNichtErreichbar { ziel })
                .await;
            return;
        }

        let stream = match self.lokalen_stream_sichern().await {
            Some(s) => s,
            None => return,
        };

        let generation = match self.maschine.ausgehend_starten(ziel) {
            Some(g) => g,
            None => return,
        };

        if !self.link_erstellen(true, stream, generation).await {
            self.maschine.fehlgeschlagen();
            return;
        }

        self.klingel_timer_starten(generation);
        self.hinweis(BenutzerHinweis::WaehltAn { ziel }).await;
        tracing::info!(ziel = %ziel, generation, "Ausgehender Anruf gestartet");
    }

    /// Nimmt den klingelnden Anruf an
    ///
    /// Medien werden vor dem Zustandsuebergang angefordert – schlaegt der
    /// Zugriff fehl, wird abgelehnt statt halb verbunden.
    async fn annehmen(&mut self) {
        if self.maschine.zustand() != AnrufZustand::Klingelt {
            return;
        }

        let stream = match self.lokalen_stream_sichern().await {
            Some(s) => s,
            None => {
                if let Some(partner) = self.maschine.ablehnen() {
                    self.senden(SignalPayload::RejectCall(RejectCallRequest { to: partner }))
                        .await;
                }
                return;
            }
        };

        let (partner, offer, generation) = match self.maschine.annehmen() {
            Some(t) => t,
            None => return,
        };

        if !self.link_erstellen(false, stream, generation).await {
            if let Some(partner) = self.maschine.fehlgeschlagen() {
                self.senden(SignalPayload::EndCall(EndCallRequest { to: partner }))
                    .await;
            }
            return;
        }

        // Offer einspielen; der Link meldet den Answer via SignalBereit
        if let Some(link) = self.aktiver_link.as_mut() {
            if let Err(e) = link.signal_anwenden(offer).await {
                tracing::warn!(fehler = %e, "Offer konnte nicht eingespielt werden");
                self.anruf_abbrechen(Some(partner), e.to_string()).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Vermittler-Nachrichten
    // -----------------------------------------------------------------------

    /// Verarbeitet eine weitergeleitete Nachricht; `false` beendet die Schleife
    async fn relay_nachricht(&mut self, nachricht: SignalNachricht) -> bool {
        match nachricht.payload {
            SignalPayload::RosterUpdate(snapshot) => {
                // Eigener Eintrag wird empfaengerseitig gefiltert
                self.roster = snapshot
                    .teilnehmer
                    .into_iter()
                    .filter(|(token, _)| *token != self.eigener_token)
                    .collect();
                self.hinweis(BenutzerHinweis::RosterAktualisiert(self.roster.clone()))
                    .await;
            }

            SignalPayload::IncomingCall(anruf) => {
                if self.maschine.eingehend(anruf.from, anruf.from_name.clone(), anruf.signal) {
                    // Unbeantwortetes Klingeln laeuft in denselben Timeout
                    // wie ein ausgehender Anruf
                    if let Some(kontext) = self.maschine.kontext() {
                        self.klingel_timer_starten(kontext.generation);
                    }
                    self.hinweis(BenutzerHinweis::EingehenderAnruf {
                        von: anruf.from,
                        name: anruf.from_name,
                    })
                    .await;
                } else {
                    // Besetzt: automatisch ablehnen, laufender Anruf
                    // bleibt unberuehrt
                    tracing::debug!(von = %anruf.from, "Eingehender Anruf waehrend besetzt – abgelehnt");
                    self.senden(SignalPayload::RejectCall(RejectCallRequest {
                        to: anruf.from,
                    }))
                    .await;
                }
            }

            SignalPayload::CallAccepted(angenommen) => {
                if self.maschine.angenommen(angenommen.from).is_some() {
                    if let Some(link) = self.aktiver_link.as_mut() {
                        if let Err(e) = link.signal_anwenden(angenommen.signal).await {
                            tracing::warn!(fehler = %e, "Answer konnte nicht eingespielt werden");
                            self.anruf_abbrechen(Some(angenommen.from), e.to_string()).await;
                            return true;
                        }
                    }
                    self.hinweis(BenutzerHinweis::AnrufAngenommen).await;
                } else {
                    tracing::debug!(von = %angenommen.from, "Verspaetetes CallAccepted verworfen");
                }
            }

            SignalPayload::CallRejected(abgelehnt) => {
                if self.maschine.abgelehnt(abgelehnt.from) {
                    self.link_schliessen().await;
                    self.hinweis(BenutzerHinweis::AnrufAbgelehnt).await;
                }
            }

            SignalPayload::CallEnded(beendet) => {
                if self.maschine.beendet_von(beendet.from) {
                    self.link_schliessen().await;
                    self.hinweis(BenutzerHinweis::AnrufBeendet).await;
                }
            }

            SignalPayload::PeerUnreachable(unerreichbar) => {
                // Waehrend eines ausgehenden Rufs wirkt dies wie eine
                // Ablehnung
                if self.maschine.abgelehnt(unerreichbar.ziel) {
                    self.link_schliessen().await;
                } else if self
                    .maschine
                    .kontext()
                    .is_some_and(|k| k.partner == unerreichbar.ziel)
                {
                    // Partner eines laufenden Anrufs ist verschwunden
                    // (z.B. mitten im Annehmen getrennt)
                    self.maschine.fehlgeschlagen();
                    self.link_schliessen().await;
                }
                self.hinweis(BenutzerHinweis::PartnerNichtErreichbar {
                    ziel: unerreichbar.ziel,
                })
                .await;
            }

            SignalPayload::SessionEvicted(hinweis) => {
                tracing::warn!(grund = %hinweis.grund, "Session verdraengt");
                self.hinweis(BenutzerHinweis::SessionVerdraengt).await;
                return false;
            }

            SignalPayload::Error(fehler) => {
                self.hinweis(BenutzerHinweis::Fehler(fehler.message)).await;
            }

            andere => {
                tracing::debug!(
                    payload = ?std::mem::discriminant(&andere),
                    "Nachricht fuer den Orchestrator irrelevant"
                );
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Peer-Link-Ereignisse
    // -----------------------------------------------------------------------

    async fn peer_link_ereignis(&mut self, generation: u64, ereignis: PeerLinkEreignis) {
        if !self.maschine.generation_aktuell(generation) {
            tracing::debug!(generation, "Verspaetetes Peer-Link-Ereignis verworfen");
            return;
        }

        match ereignis {
            PeerLinkEreignis::SignalBereit(signal) => {
                let kontext = match self.maschine.kontext() {
                    Some(k) => k,
                    None => return,
                };
                let partner = kontext.partner;
                let payload = match kontext.richtung {
                    // Initiator: das Signal ist das Offer
                    AnrufRichtung::Ausgehend => SignalPayload::CallUser(CallUserRequest {
                        to: partner,
                        signal,
                    }),
                    // Angerufener: das Signal ist der Answer
                    AnrufRichtung::Eingehend => SignalPayload::AcceptCall(AcceptCallRequest {
                        to: partner,
                        signal,
                    }),
                };
                self.senden(payload).await;
            }

            PeerLinkEreignis::RemoteStream(stream) => {
                self.hinweis(BenutzerHinweis::RemoteStream(stream)).await;
            }

            PeerLinkEreignis::Fehlgeschlagen(grund) => {
                tracing::warn!(grund = %grund, "Peer-Link fehlgeschlagen");
                let partner = self.maschine.fehlgeschlagen();
                self.anruf_abbrechen(partner, grund).await;
            }
        }
    }

    async fn klingel_timeout(&mut self, generation: u64) {
        if !self.maschine.generation_aktuell(generation) {
            return;
        }
        match self.maschine.zustand() {
            // Ausgehend: Gegenstelle hebt nicht ab
            AnrufZustand::WaehltAn => {
                tracing::info!(generation, "Klingel-Timeout – ausgehender Anruf wird beendet");
                if let Some(partner) = self.maschine.beenden() {
                    self.senden(SignalPayload::EndCall(EndCallRequest { to: partner }))
                        .await;
                    self.hinweis(BenutzerHinweis::PartnerNichtErreichbar { ziel: partner })
                        .await;
                }
                self.link_schliessen().await;
            }
            // Eingehend: niemand nimmt ab, wirkt wie lokales Ablehnen
            AnrufZustand::Klingelt => {
                tracing::info!(generation, "Klingel-Timeout – eingehender Anruf wird abgelehnt");
                if let Some(partner) = self.maschine.ablehnen() {
                    self.senden(SignalPayload::RejectCall(RejectCallRequest { to: partner }))
                        .await;
                    self.hinweis(BenutzerHinweis::AnrufBeendet).await;
                }
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Fordert den lokalen Medienstrom an (oder liefert den gecachten)
    async fn lokalen_stream_sichern(&mut self) -> Option<MedienStream> {
        if let Some(stream) = &self.lokaler_stream {
            return Some(stream.clone());
        }
        match self.medien.anfordern(self.config.medien_vorgaben).await {
            Ok(stream) => {
                self.lokaler_stream = Some(stream.clone());
                Some(stream)
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Medienzugriff fehlgeschlagen");
                self.hinweis(BenutzerHinweis::Fehler(e.to_string())).await;
                None
            }
        }
    }

    /// Erstellt den Peer-Link und verdrahtet seine Ereignisse mit der
    /// Orchestrator-Queue (generationsgestempelt)
    async fn link_erstellen(
        &mut self,
        initiator: bool,
        stream: MedienStream,
        generation: u64,
    ) -> bool {
        let (link_tx, mut link_rx) = mpsc::channel::<PeerLinkEreignis>(16);
        let ereignis_tx = self.ereignis_tx.clone();
        tokio::spawn(async move {
            while let Some(ereignis) = link_rx.recv().await {
                if ereignis_tx
                    .send(OrchestratorEreignis::PeerLink {
                        generation,
                        ereignis,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        match self.fabrik.erstellen(initiator, stream, link_tx).await {
            Ok(link) => {
                self.aktiver_link = Some(link);
                true
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Peer-Link konnte nicht erstellt werden");
                self.hinweis(BenutzerHinweis::Fehler(e.to_string())).await;
                false
            }
        }
    }

    fn klingel_timer_starten(&self, generation: u64) {
        let timeout = match self.config.klingel_timeout {
            Some(t) => t,
            None => return,
        };
        let ereignis_tx = self.ereignis_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = ereignis_tx
                .send(OrchestratorEreignis::KlingelTimeout { generation })
                .await;
        });
    }

    /// Bricht den Anruf nach einem lokalen Fehler ab
    async fn anruf_abbrechen(&mut self, partner: Option<SessionToken>, grund: String) {
        self.maschine.fehlgeschlagen();
        if let Some(partner) = partner {
            self.senden(SignalPayload::EndCall(EndCallRequest { to: partner }))
                .await;
        }
        self.link_schliessen().await;
        self.hinweis(BenutzerHinweis::Fehler(grund)).await;
    }

    async fn link_schliessen(&mut self) {
        if let Some(mut link) = self.aktiver_link.take() {
            link.schliessen().await;
        }
    }

    async fn senden(&mut self, payload: SignalPayload) {
        let request_id = self.naechste_request_id;
        self.naechste_request_id = self.naechste_request_id.wrapping_add(1);
        if self
            .ausgang_tx
            .send(SignalNachricht::neu(request_id, payload))
            .await
            .is_err()
        {
            tracing::warn!("Verbindungs-Task nicht mehr erreichbar");
        }
    }

    async fn hinweis(&self, hinweis: BenutzerHinweis) {
        if self.hinweis_tx.send(hinweis).await.is_err() {
            tracing::debug!("Oberflaeche nimmt keine Hinweise mehr an");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KlientFehler, KlientResult};
    use sichtruf_protocol::signal::{
        CallAcceptedNotice, CallEndedNotice, CallRejectedNotice, ErrorResponse, EvictionNotice,
        IncomingCallNotice, PeerUnreachableNotice, RosterSnapshot, SignalBlob,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    // --- Attrappen -------------------------------------------------------

    struct FakeMedien {
        schlaegt_fehl: bool,
    }

    impl MedienQuelle for FakeMedien {
        async fn anfordern(&self, _vorgaben: MedienVorgaben) -> KlientResult<MedienStream> {
            if self.schlaegt_fehl {
                Err(KlientFehler::Medien("Kamera belegt".into()))
            } else {
                Ok(MedienStream::neu("lokal"))
            }
        }
    }

    struct FakeLink {
        geschlossen: Arc<AtomicBool>,
        empfangene_signale: Arc<std::sync::Mutex<Vec<SignalBlob>>>,
    }

    impl PeerLink for FakeLink {
        async fn signal_anwenden(&mut self, signal: SignalBlob) -> KlientResult<()> {
            self.empfangene_signale.lock().unwrap().push(signal);
            Ok(())
        }

        async fn schliessen(&mut self) {
            self.geschlossen.store(true, Ordering::SeqCst);
        }
    }

    /// Fabrik, die das lokale Signal sofort meldet und die Handles fuer
    /// Zusicherungen aufhebt
    struct FakeFabrik {
        geschlossen: Arc<AtomicBool>,
        empfangene_signale: Arc<std::sync::Mutex<Vec<SignalBlob>>>,
    }

    impl FakeFabrik {
        fn neu() -> Self {
            Self {
                geschlossen: Arc::new(AtomicBool::new(false)),
                empfangene_signale: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    impl PeerLinkFabrik for FakeFabrik {
        type Link = FakeLink;

        async fn erstellen(
            &self,
            initiator: bool,
            _lokaler_stream: MedienStream,
            ereignis_tx: mpsc::Sender<PeerLinkEreignis>,
        ) -> KlientResult<FakeLink> {
            let inhalt = if initiator { "offer" } else { "answer" };
            let _ = ereignis_tx
                .send(PeerLinkEreignis::SignalBereit(SignalBlob::neu(
                    serde_json::json!({ "sdp": inhalt }),
                )))
                .await;
            Ok(FakeLink {
                geschlossen: Arc::clone(&self.geschlossen),
                empfangene_signale: Arc::clone(&self.empfangene_signale),
            })
        }
    }

    // --- Test-Aufbau -----------------------------------------------------

    struct TestAufbau {
        orchestrator: AnrufOrchestrator<FakeMedien, FakeFabrik>,
        ausgang_rx: mpsc::Receiver<SignalNachricht>,
        hinweis_rx: mpsc::Receiver<BenutzerHinweis>,
        geschlossen: Arc<AtomicBool>,
        empfangene_signale: Arc<std::sync::Mutex<Vec<SignalBlob>>>,
    }

    fn aufbau(medien_fehler: bool) -> TestAufbau {
        let fabrik = FakeFabrik::neu();
        let geschlossen = Arc::clone(&fabrik.geschlossen);
        let empfangene_signale = Arc::clone(&fabrik.empfangene_signale);
        let (ausgang_tx, ausgang_rx) = mpsc::channel(16);
        let (hinweis_tx, hinweis_rx) = mpsc::channel(16);
        let orchestrator = AnrufOrchestrator::neu(
            SessionToken::neu(),
            FakeMedien {
                schlaegt_fehl: medien_fehler,
            },
            fabrik,
            OrchestratorConfig {
                klingel_timeout: None,
                ..Default::default()
            },
            ausgang_tx,
            hinweis_tx,
        );
        TestAufbau {
            orchestrator,
            ausgang_rx,
            hinweis_rx,
            geschlossen,
            empfangene_signale,
        }
    }

    fn blob(inhalt: &str) -> SignalBlob {
        SignalBlob::neu(serde_json::json!({ "sdp": inhalt }))
    }

    /// Spielt ein Roster mit dem angegebenen Partner ein
    async fn roster_einspielen(
        aufbau: &mut TestAufbau,
        partner: SessionToken,
    ) {
        let mut teilnehmer = BTreeMap::new();
        teilnehmer.insert(partner, "Partner".to_string());
        aufbau
            .orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::RosterUpdate(RosterSnapshot { teilnehmer }),
            )))
            .await;
        aufbau.hinweis_rx.try_recv().ok();
    }

    /// Pumpt das vom FakeLink gemeldete SignalBereit-Ereignis durch die
    /// Orchestrator-Queue
    async fn link_ereignis_pumpen(aufbau: &mut TestAufbau) {
        // Die Forwarder-Task muss das Ereignis erst zustellen
        tokio::task::yield_now().await;
        let ereignis = aufbau
            .orchestrator
            .ereignis_rx
            .recv()
            .await
            .expect("Peer-Link-Ereignis erwartet");
        aufbau.orchestrator.verarbeiten(ereignis).await;
    }

    // --- Szenarien -------------------------------------------------------

    #[tokio::test]
    async fn ausgehender_anruf_sendet_offer_und_verbindet() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::WaehltAn);

        // Offer des Peer-Links wird als CallUser gesendet
        link_ereignis_pumpen(&mut t).await;
        let raus = t.ausgang_rx.try_recv().unwrap();
        match raus.payload {
            SignalPayload::CallUser(c) => {
                assert_eq!(c.to, partner);
                assert_eq!(c.signal, blob("offer"));
            }
            other => panic!("Erwartet CallUser, erhalten {:?}", other),
        }

        // Gegenstelle nimmt an: Answer landet im Peer-Link
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::CallAccepted(CallAcceptedNotice {
                    from: partner,
                    signal: blob("answer"),
                }),
            )))
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Verbunden);
        assert_eq!(
            t.empfangene_signale.lock().unwrap().as_slice(),
            &[blob("answer")]
        );
    }

    #[tokio::test]
    async fn eingehender_anruf_annehmen_sendet_answer() {
        let mut t = aufbau(false);
        let anrufer = SessionToken::neu();

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::IncomingCall(IncomingCallNotice {
                    from: anrufer,
                    from_name: "Anna".into(),
                    signal: blob("offer"),
                }),
            )))
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Klingelt);
        assert!(matches!(
            t.hinweis_rx.try_recv().unwrap(),
            BenutzerHinweis::EingehenderAnruf { von, .. } if von == anrufer
        ));

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Annehmen))
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Verbunden);

        // Der geparkte Offer wurde in den Link eingespielt
        assert_eq!(
            t.empfangene_signale.lock().unwrap().as_slice(),
            &[blob("offer")]
        );

        // Answer des Peer-Links wird als AcceptCall gesendet
        link_ereignis_pumpen(&mut t).await;
        let raus = t.ausgang_rx.try_recv().unwrap();
        match raus.payload {
            SignalPayload::AcceptCall(a) => {
                assert_eq!(a.to, anrufer);
                assert_eq!(a.signal, blob("answer"));
            }
            other => panic!("Erwartet AcceptCall, erhalten {:?}", other),
        }
    }

    #[tokio::test]
    async fn zweiter_anruf_waehrend_besetzt_wird_automatisch_abgelehnt() {
        let mut t = aufbau(false);
        let erster = SessionToken::neu();
        let stoerer = SessionToken::neu();

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::IncomingCall(IncomingCallNotice {
                    from: erster,
                    from_name: "Anna".into(),
                    signal: blob("offer-1"),
                }),
            )))
            .await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::IncomingCall(IncomingCallNotice {
                    from: stoerer,
                    from_name: "Ben".into(),
                    signal: blob("offer-2"),
                }),
            )))
            .await;

        // Stoerer erhaelt RejectCall, laufender Anruf bleibt unberuehrt
        let raus = t.ausgang_rx.try_recv().unwrap();
        match raus.payload {
            SignalPayload::RejectCall(r) => assert_eq!(r.to, stoerer),
            other => panic!("Erwartet RejectCall, erhalten {:?}", other),
        }
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Klingelt);
        assert_eq!(t.orchestrator.maschine.kontext().unwrap().partner, erster);
    }

    #[tokio::test]
    async fn ablehnung_beendet_ausgehenden_anruf() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::CallRejected(CallRejectedNotice { from: partner }),
            )))
            .await;

        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
        assert!(t.geschlossen.load(Ordering::SeqCst), "Link muss geschlossen sein");
    }

    #[tokio::test]
    async fn auflegen_sendet_end_call_und_schliesst_link() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::CallAccepted(CallAcceptedNotice {
                    from: partner,
                    signal: blob("answer"),
                }),
            )))
            .await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Auflegen))
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
        assert!(t.geschlossen.load(Ordering::SeqCst));

        let raus: Vec<_> = std::iter::from_fn(|| t.ausgang_rx.try_recv().ok()).collect();
        assert!(raus
            .iter()
            .any(|n| matches!(&n.payload, SignalPayload::EndCall(e) if e.to == partner)));
    }

    #[tokio::test]
    async fn auflegen_der_gegenstelle_beendet_verbundenen_anruf() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::CallAccepted(CallAcceptedNotice {
                    from: partner,
                    signal: blob("answer"),
                }),
            )))
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Verbunden);

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::CallEnded(CallEndedNotice { from: partner }),
            )))
            .await;

        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
        assert!(t.geschlossen.load(Ordering::SeqCst), "Link muss geschlossen sein");
        let hinweise: Vec<_> = std::iter::from_fn(|| t.hinweis_rx.try_recv().ok()).collect();
        assert!(hinweise
            .iter()
            .any(|h| matches!(h, BenutzerHinweis::AnrufBeendet)));
    }

    #[tokio::test]
    async fn peer_unreachable_wirkt_wie_ablehnung() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::PeerUnreachable(PeerUnreachableNotice { ziel: partner }),
            )))
            .await;

        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
    }

    #[tokio::test]
    async fn peer_unreachable_beendet_laufenden_anruf_mit_partner() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::CallAccepted(CallAcceptedNotice {
                    from: partner,
                    signal: blob("answer"),
                }),
            )))
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Verbunden);

        // Partner verschwindet waehrend des Anrufs vom Vermittler
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::PeerUnreachable(PeerUnreachableNotice { ziel: partner }),
            )))
            .await;

        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
        assert!(t.geschlossen.load(Ordering::SeqCst), "Link muss geschlossen sein");
    }

    #[tokio::test]
    async fn anruf_an_unbekanntes_ziel_scheitert_lokal() {
        let mut t = aufbau(false);
        let fremd = SessionToken::neu();

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: fremd,
            }))
            .await;

        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
        assert!(matches!(
            t.hinweis_rx.try_recv().unwrap(),
            BenutzerHinweis::PartnerNichtErreichbar { ziel } if ziel == fremd
        ));
        assert!(t.ausgang_rx.try_recv().is_err(), "Nichts darf gesendet werden");
    }

    #[tokio::test]
    async fn medienfehler_laesst_maschine_ruhend() {
        let mut t = aufbau(true);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;

        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
        assert!(matches!(
            t.hinweis_rx.try_recv().unwrap(),
            BenutzerHinweis::Fehler(_)
        ));
    }

    #[tokio::test]
    async fn verspaetetes_link_ereignis_wird_verworfen() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        let generation = t.orchestrator.maschine.kontext().unwrap().generation;

        // Anruf endet bevor das Link-Ereignis verarbeitet wird
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Auflegen))
            .await;
        while t.ausgang_rx.try_recv().is_ok() {}

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::PeerLink {
                generation,
                ereignis: PeerLinkEreignis::SignalBereit(blob("zu-spaet")),
            })
            .await;

        assert!(
            t.ausgang_rx.try_recv().is_err(),
            "Verspaetetes Signal darf nichts ausloesen"
        );
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
    }

    #[tokio::test]
    async fn klingel_timeout_beendet_nur_aktuellen_anruf() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        let generation = t.orchestrator.maschine.kontext().unwrap().generation;

        // Timeout der aktuellen Generation beendet den Anruf
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::KlingelTimeout { generation })
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);

        // Neuer Anruf, alter Timeout feuert verspaetet: No-Op
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::KlingelTimeout { generation })
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::WaehltAn);
    }

    #[tokio::test]
    async fn klingel_timeout_lehnt_unbeantworteten_eingehenden_anruf_ab() {
        let mut t = aufbau(false);
        let anrufer = SessionToken::neu();

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::IncomingCall(IncomingCallNotice {
                    from: anrufer,
                    from_name: "Anna".into(),
                    signal: blob("offer"),
                }),
            )))
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Klingelt);
        let generation = t.orchestrator.maschine.kontext().unwrap().generation;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::KlingelTimeout { generation })
            .await;

        // Niemand hat abgenommen: Anrufer erhaelt RejectCall, Maschine ruht
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
        let raus = t.ausgang_rx.try_recv().unwrap();
        match raus.payload {
            SignalPayload::RejectCall(r) => assert_eq!(r.to, anrufer),
            other => panic!("Erwartet RejectCall, erhalten {:?}", other),
        }

        // Ein verspaeteter Timeout derselben Generation ist danach ein No-Op
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::KlingelTimeout { generation })
            .await;
        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
    }

    #[tokio::test]
    async fn link_fehler_beendet_anruf_und_informiert_gegenstelle() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        let generation = t.orchestrator.maschine.kontext().unwrap().generation;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::PeerLink {
                generation,
                ereignis: PeerLinkEreignis::Fehlgeschlagen("ICE gescheitert".into()),
            })
            .await;

        assert_eq!(t.orchestrator.zustand(), AnrufZustand::Ruhend);
        let raus: Vec<_> = std::iter::from_fn(|| t.ausgang_rx.try_recv().ok()).collect();
        assert!(raus
            .iter()
            .any(|n| matches!(&n.payload, SignalPayload::EndCall(e) if e.to == partner)));
    }

    #[tokio::test]
    async fn roster_update_filtert_eigenen_eintrag() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        let eigener = t.orchestrator.eigener_token;

        let mut teilnehmer = BTreeMap::new();
        teilnehmer.insert(eigener, "Ich".to_string());
        teilnehmer.insert(partner, "Partner".to_string());
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::RosterUpdate(RosterSnapshot { teilnehmer }),
            )))
            .await;

        assert_eq!(t.orchestrator.roster().len(), 1);
        assert!(t.orchestrator.roster().contains_key(&partner));
        assert!(!t.orchestrator.roster().contains_key(&eigener));
    }

    #[tokio::test]
    async fn session_evicted_beendet_schleife() {
        let mut t = aufbau(false);
        let weiter = t
            .orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::SessionEvicted(EvictionNotice {
                    grund: "Neuere Verbindung".into(),
                }),
            )))
            .await;
        assert!(!weiter);
        assert!(matches!(
            t.hinweis_rx.try_recv().unwrap(),
            BenutzerHinweis::SessionVerdraengt
        ));
    }

    #[tokio::test]
    async fn vermittler_fehler_wird_als_hinweis_gemeldet() {
        let mut t = aufbau(false);
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Relay(SignalNachricht::weitergeleitet(
                SignalPayload::Error(ErrorResponse {
                    code: sichtruf_protocol::signal::ErrorCode::InvalidRequest,
                    message: "kaputt".into(),
                }),
            )))
            .await;
        assert!(matches!(
            t.hinweis_rx.try_recv().unwrap(),
            BenutzerHinweis::Fehler(m) if m == "kaputt"
        ));
    }

    #[tokio::test]
    async fn medienstream_ueberlebt_anrufgrenzen() {
        let mut t = aufbau(false);
        let partner = SessionToken::neu();
        roster_einspielen(&mut t, partner).await;

        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Anrufen {
                ziel: partner,
            }))
            .await;
        t.orchestrator
            .verarbeiten(OrchestratorEreignis::Lokal(LokaleAbsicht::Auflegen))
            .await;

        assert!(
            t.orchestrator.lokaler_stream.is_some(),
            "Stream bleibt nach dem Anruf am Leben"
        );
    }
}
