//! Signal-Relay – Gezieltes Senden und Broadcasts
//!
//! Der `SignalRelay` ist der transportunabhaengige Sendekanal des
//! Vermittlers: er stellt benannte Nachrichten genau der Verbindung zu,
//! die aktuell fuer einen Token registriert ist, oder meldet dem Absender
//! `PartnerNichtErreichbar` – nie stilles Verwerfen.
//!
//! FIFO-Garantie pro gerichtetem Endpunkt-Paar: jede Verbindung leitet
//! sequenziell in die mpsc-Queue des Ziels weiter; ueber verschiedene
//! Paare hinweg gibt es keine Ordnungsgarantie.

use sichtruf_core::types::SessionToken;
use sichtruf_protocol::signal::SignalNachricht;

use crate::error::{RelayFehler, RelayResult};
use crate::register::SessionRegister;

/// Transportunabhaengiger Sendekanal des Vermittlers
#[derive(Clone)]
pub struct SignalRelay {
    register: SessionRegister,
}

impl SignalRelay {
    /// Erstellt einen neuen SignalRelay ueber dem gegebenen Register
    pub fn neu(register: SessionRegister) -> Self {
        Self { register }
    }

    /// Stellt eine Nachricht der lebenden Verbindung eines Tokens zu
    ///
    /// Gibt `PartnerNichtErreichbar` zurueck wenn keine Verbindung
    /// registriert ist (z.B. Gegenstelle mitten im Klingeln getrennt),
    /// `SendFehler` wenn die Queue voll oder geschlossen ist. Beides muss
    /// der Aufrufer dem Absender zurueckmelden.
    pub fn an_token_senden(
        &self,
        ziel: &SessionToken,
        nachricht: SignalNachricht,
    ) -> RelayResult<()> {
        let sender = self
            .register
            .sender_von(ziel)
            .ok_or(RelayFehler::PartnerNichtErreichbar(*ziel))?;

        if sender.senden(nachricht) {
            Ok(())
        } else {
            Err(RelayFehler::SendFehler(*ziel))
        }
    }

    /// Sendet eine Nachricht an alle registrierten Verbindungen
    ///
    /// Gibt die Anzahl der erfolgreichen Sendungen zurueck.
    pub fn an_alle_senden(&self, nachricht: SignalNachricht) -> usize {
        let mut gesendet = 0;
        for sender in self.register.alle_sender() {
            if sender.senden(nachricht.clone()) {
                gesendet += 1;
            }
        }
        gesendet
    }

    /// Sendet eine Nachricht an alle registrierten Verbindungen ausser einer
    pub fn an_alle_ausser_senden(
        &self,
        ausgeschlossen: &SessionToken,
        nachricht: SignalNachricht,
    ) -> usize {
        let mut gesendet = 0;
        for sender in self.register.alle_sender() {
            if sender.token == *ausgeschlossen {
                continue;
            }
            if sender.senden(nachricht.clone()) {
                gesendet += 1;
            }
        }
        gesendet
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
