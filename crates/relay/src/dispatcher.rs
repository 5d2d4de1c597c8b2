//! Vermittlungs-Dispatcher – Routet Signal-Nachrichten
//!
//! Der Dispatcher empfaengt Nachrichten einer KlientVerbindung, fuehrt den
//! Hello/Identity-Handshake aus und leitet Anruf-Nachrichten an die
//! adressierte Gegenstelle weiter. Das `from`-Feld weitergeleiteter
//! Nachrichten stempelt der Dispatcher aus dem Verbindungskontext – ein
//! Client kann keine fremde Absenderkennung vortaeuschen.
//!
//! ## Zustandspruefung
//! - `Hello` nur einmal pro Verbindung
//! - Anruf-Nachrichten nur nach abgeschlossenem Handshake

use sichtruf_core::types::{SessionToken, VerbindungsId};
use sichtruf_protocol::signal::{
    CallAcceptedNotice, CallEndedNotice, CallRejectedNotice, ErrorCode, HelloRequest,
    IdentityResponse, IncomingCallNotice, PeerUnreachableNotice, RosterSnapshot, SignalNachricht,
    SignalPayload,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::server_state::VermittlerZustand;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
pub struct DispatcherContext {
    /// Peer-IP-Adresse fuer Logs
    pub peer_addr: SocketAddr,
    /// ID dieser physischen Verbindung (Wache gegen verspaetete Disconnects)
    pub verbindungs_id: VerbindungsId,
    /// Session-Token nach abgeschlossenem Handshake (None vorher)
    pub token: Option<SessionToken>,
    /// Send-Queue dieser Verbindung (wird beim Hello im Register hinterlegt)
    pub sende_tx: mpsc::Sender<SignalNachricht>,
    /// Verdraengungs-Signal dieser Verbindung (watch, nie starvebar)
    pub verdraengt_tx: Arc<watch::Sender<bool>>,
}

/// Zentraler Dispatcher des Vermittlers
///
/// Routet eingehende Signal-Nachrichten und gibt die direkte Antwort an
/// die sendende Verbindung zurueck (`None` wenn keine Antwort noetig ist).
pub struct VermittlungsDispatcher {
    state: Arc<VermittlerZustand>,
}

impl VermittlungsDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<VermittlerZustand>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine eingehende Signal-Nachricht
    pub fn dispatch(
        &self,
        nachricht: SignalNachricht,
        ctx: &mut DispatcherContext,
    ) -> Option<SignalNachricht> {
        let request_id = nachricht.request_id;

        match nachricht.payload {
            // ---------------------------------------------------------------
            // Handshake (immer erlaubt)
            // ---------------------------------------------------------------
            SignalPayload::Hello(req) => Some(self.hello_verarbeiten(req, request_id, ctx)),

            // ---------------------------------------------------------------
            // Keepalive
            // ---------------------------------------------------------------
            SignalPayload::Ping(ping) => {
                let server_ts = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                Some(SignalNachricht::pong(
                    request_id,
                    ping.timestamp_ms,
                    server_ts,
                ))
            }

            SignalPayload::Pong(_) => {
                tracing::trace!(peer = %ctx.peer_addr, "Pong empfangen (RTT-Messung)");
                None
            }

            // ---------------------------------------------------------------
            // Handshake erfordernde Nachrichten
            // ---------------------------------------------------------------
            payload => {
                let token = match ctx.token {
                    Some(t) => t,
                    None => {
                        tracing::warn!(peer = %ctx.peer_addr, "Anruf-Nachricht vor Handshake");
                        return Some(SignalNachricht::fehler(
                            request_id,
                            ErrorCode::NotEstablished,
                            "Zuerst Hello senden",
                        ));
                    }
                };

                self.dispatch_etabliert(payload, request_id, token, ctx)
            }
        }
    }

    /// Routet Nachrichten die einen abgeschlossenen Handshake erfordern
    fn dispatch_etabliert(
        &self,
        payload: SignalPayload,
        request_id: u32,
        from: SessionToken,
        ctx: &DispatcherContext,
    ) -> Option<SignalNachricht> {
        match payload {
            // ---------------------------------------------------------------
            // Anruf-Weiterleitung
            // ---------------------------------------------------------------
            SignalPayload::CallUser(req) => {
                let from_name = self
                    .state
                    .roster
                    .name_von(&from)
                    .unwrap_or_else(|| format!("Gast-{}", from.kurzform()));
                self.weiterleiten(
                    req.to,
                    SignalPayload::IncomingCall(IncomingCallNotice {
                        from,
                        from_name,
                        signal: req.signal,
                    }),
                    request_id,
                )
            }

            SignalPayload::AcceptCall(req) => self.weiterleiten(
                req.to,
                SignalPayload::CallAccepted(CallAcceptedNotice {
                    from,
                    signal: req.signal,
                }),
                request_id,
            ),

            SignalPayload::RejectCall(req) => self.weiterleiten(
                req.to,
                SignalPayload::CallRejected(CallRejectedNotice { from }),
                request_id,
            ),

            SignalPayload::EndCall(req) => self.weiterleiten(
                req.to,
                SignalPayload::CallEnded(CallEndedNotice { from }),
                request_id,
            ),

            // ---------------------------------------------------------------
            // Nachrichten die nur der Vermittler senden darf
            // ---------------------------------------------------------------
            SignalPayload::Identity(_)
            | SignalPayload::SessionEvicted(_)
            | SignalPayload::RosterUpdate(_)
            | SignalPayload::IncomingCall(_)
            | SignalPayload::CallAccepted(_)
            | SignalPayload::CallRejected(_)
            | SignalPayload::CallEnded(_)
            | SignalPayload::PeerUnreachable(_)
            | SignalPayload::Error(_) => {
                tracing::warn!(
                    peer = %ctx.peer_addr,
                    request_id,
                    "Unerwartete Vermittler->Client Nachricht vom Client empfangen"
                );
                Some(SignalNachricht::fehler(
                    request_id,
                    ErrorCode::InvalidRequest,
                    "Unerwartete Nachricht",
                ))
            }

            // Hello/Ping/Pong werden oben bereits behandelt
            SignalPayload::Hello(_) | SignalPayload::Ping(_) | SignalPayload::Pong(_) => None,
        }
    }

    /// Fuehrt den Hello/Identity-Handshake aus
    ///
    /// Loest den vorgelegten Token auf (fehlend/fehlerhaft -> frisch),
    /// registriert die Verbindung, verdraengt eine eventuell noch lebende
    /// aeltere Verbindung desselben Tokens und verteilt das aktualisierte
    /// Roster an alle.
    fn hello_verarbeiten(
        &self,
        req: HelloRequest,
        request_id: u32,
        ctx: &mut DispatcherContext,
    ) -> SignalNachricht {
        if ctx.token.is_some() {
            return SignalNachricht::fehler(
                request_id,
                ErrorCode::AlreadyEstablished,
                "Handshake bereits abgeschlossen",
            );
        }

        let token = self.state.register.aufloesen(req.token.as_deref());
        let anzeige_name = req
            .gewuenschter_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Gast-{}", token.kurzform()));

        // Neue Verbindung wird massgeblich; die alte Verbindungs-Task
        // stellt nach dem Signal selbst SessionEvicted zu und beendet sich
        if let Some(alte) = self.state.register.registrieren(
            token,
            ctx.verbindungs_id,
            ctx.sende_tx.clone(),
            Arc::clone(&ctx.verdraengt_tx),
        ) {
            alte.verdraengen();
        }

        self.state.roster.eintragen(token, anzeige_name.clone());
        ctx.token = Some(token);

        tracing::info!(
            peer = %ctx.peer_addr,
            token = %token,
            name = %anzeige_name,
            "Handshake abgeschlossen"
        );

        self.roster_verteilen();

        SignalNachricht::neu(
            request_id,
            SignalPayload::Identity(IdentityResponse {
                token,
                anzeige_name,
            }),
        )
    }

    /// Leitet eine Anruf-Nachricht an die Gegenstelle weiter
    ///
    /// Ist das Ziel nicht (mehr) registriert oder nicht zustellbar, wird
    /// dem Absender `PeerUnreachable` zurueckgemeldet – nie stilles
    /// Verwerfen.
    fn weiterleiten(
        &self,
        ziel: SessionToken,
        payload: SignalPayload,
        request_id: u32,
    ) -> Option<SignalNachricht> {
        match self
            .state
            .relay
            .an_token_senden(&ziel, SignalNachricht::weitergeleitet(payload))
        {
            Ok(()) => None,
            Err(fehler) => {
                tracing::debug!(ziel = %ziel, fehler = %fehler, "Weiterleitung fehlgeschlagen");
                Some(SignalNachricht::neu(
                    request_id,
                    SignalPayload::PeerUnreachable(PeerUnreachableNotice { ziel }),
                ))
            }
        }
    }

    /// Verteilt die volle Roster-Tabelle an alle registrierten Clients
    ///
    /// Der eigene Eintrag wird vom Empfaenger herausgefiltert.
    fn roster_verteilen(&self) {
        let momentaufnahme = self.state.roster.momentaufnahme();
        let anzahl = self
            .state
            .relay
            .an_alle_senden(SignalNachricht::weitergeleitet(SignalPayload::RosterUpdate(
                RosterSnapshot {
                    teilnehmer: momentaufnahme,
                },
            )));
        tracing::debug!(empfaenger = anzahl, "Roster verteilt");
    }

    /// Bereinigt die Ressourcen einer Verbindung beim Trennen
    ///
    /// Traegt die Session nur aus wenn diese Verbindung noch die
    /// registrierte ist (eine verdraengte Verbindung darf die neuere
    /// Session nicht austragen) und verteilt danach das Roster.
    pub fn verbindung_beenden(&self, ctx: &DispatcherContext) {
        if let Some(token) = ctx.token {
            if self.state.register.abmelden(&token, &ctx.verbindungs_id) {
                self.state.roster.entfernen(&token);
                self.roster_verteilen();
                tracing::debug!(token = %token, "Verbindungs-Ressourcen bereinigt");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
