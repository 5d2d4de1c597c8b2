//! Anruf-Zustandsmaschine
//!
//! Modelliert den Lebenszyklus eines 1:1-Anrufs aus Sicht eines Clients.
//! Es gibt zu jedem Zeitpunkt hoechstens einen aktiven Anruf; der
//! Orchestrator fuehrt alle Uebergaenge sequenziell in seiner
//! Ereignisschleife aus.
//!
//! ## Zustaende
//! ```text
//!                +-- ablehnen/abgelehnt --+
//!                |                        v
//! Ruhend -> WaehltAn -- angenommen --> Verbunden
//!    |                                    |
//!    +------- Klingelt -- annehmen -------+
//!    ^                                    |
//!    +---------- beenden/beendet ---------+
//! ```
//!
//! Invariante: ein `AnrufKontext` existiert genau dann, wenn der Zustand
//! nicht `Ruhend` ist. Jeder Kontext traegt eine monoton steigende
//! Generationsnummer; verspaetete asynchrone Rueckrufe (Peer-Link-Signale,
//! Klingel-Timeouts) werden verworfen, wenn ihre Generation nicht mehr
//! die aktuelle ist.

use sichtruf_core::types::SessionToken;
use sichtruf_protocol::signal::SignalBlob;

// ---------------------------------------------------------------------------
// Zustaende und Kontext
// ---------------------------------------------------------------------------

/// Zustand der Anruf-Zustandsmaschine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnrufZustand {
    /// Kein Anruf aktiv
    Ruhend,
    /// Ausgehender Anruf, wartet auf Annahme/Ablehnung
    WaehltAn,
    /// Eingehender Anruf, wartet auf lokale Entscheidung
    Klingelt,
    /// Anruf laeuft, Peer-Link wird aufgebaut oder steht
    Verbunden,
}

/// Richtung des aktiven Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnrufRichtung {
    Ausgehend,
    Eingehend,
}

/// Kontext des aktiven Anrufs
///
/// Existiert genau dann, wenn der Zustand nicht `Ruhend` ist.
#[derive(Debug, Clone)]
pub struct AnrufKontext {
    /// Token der Gegenstelle
    pub partner: SessionToken,
    /// Anzeigename der Gegenstelle (bei eingehenden Anrufen bekannt)
    pub partner_name: Option<String>,
    pub richtung: AnrufRichtung,
    /// Bei eingehenden Anrufen: der Offer-Blob, der beim Annehmen an den
    /// Peer-Link uebergeben wird
    pub wartendes_signal: Option<SignalBlob>,
    /// Generationsnummer dieses Anrufs, Wache gegen verspaetete Rueckrufe
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// Zustandsmaschine
// ---------------------------------------------------------------------------

/// Anruf-Zustandsmaschine
///
/// Alle Uebergaenge pruefen den Ausgangszustand; ein unpassendes Ereignis
/// (z.B. `CallAccepted` im Zustand `Ruhend`) ist ein No-Op und gibt
/// `false` zurueck. Das haelt die Maschine robust gegen Nachrichten, die
/// das Rennen mit einem Auflegen oder einer Ablehnung verloren haben.
#[derive(Debug)]
pub struct AnrufMaschine {
    zustand: AnrufZustand,
    kontext: Option<AnrufKontext>,
    /// Monoton steigender Generationszaehler ueber alle Anrufe
    naechste_generation: u64,
}

impl AnrufMaschine {
    /// Erstellt eine neue Zustandsmaschine im Zustand `Ruhend`
    pub fn neu() -> Self {
        Self {
            zustand: AnrufZustand::Ruhend,
            kontext: None,
            naechste_generation: 1,
        }
    }

    pub fn zustand(&self) -> AnrufZustand {
        self.zustand
    }

    pub fn kontext(&self) -> Option<&AnrufKontext> {
        self.kontext.as_ref()
    }

    /// Prueft ob ein Anruf aktiv ist (irgendein Zustand ausser `Ruhend`)
    pub fn ist_beschaeftigt(&self) -> bool {
        self.zustand != AnrufZustand::Ruhend
    }

    /// Prueft ob eine Generationsnummer noch die des aktiven Anrufs ist
    pub fn generation_aktuell(&self, generation: u64) -> bool {
        self.kontext
            .as_ref()
            .map(|k| k.generation == generation)
            .unwrap_or(false)
    }

    fn generation_ziehen(&mut self) -> u64 {
        let g = self.naechste_generation;
        self.naechste_generation += 1;
        g
    }

    // -----------------------------------------------------------------------
    // Uebergaenge
    // -----------------------------------------------------------------------

    /// Ruhend -> WaehltAn: lokaler Benutzer startet einen Anruf
    ///
    /// Gibt die Generation des neuen Anrufs zurueck, `None` wenn bereits
    /// ein Anruf aktiv ist.
    pub fn ausgehend_starten(&mut self, partner: SessionToken) -> Option<u64> {
        if self.zustand != AnrufZustand::Ruhend {
            return None;
        }
        let generation = self.generation_ziehen();
        self.zustand = AnrufZustand::WaehltAn;
        self.kontext = Some(AnrufKontext {
            partner,
            partner_name: None,
            richtung: AnrufRichtung::Ausgehend,
            wartendes_signal: None,
            generation,
        });
        Some(generation)
    }

    /// Ruhend -> Klingelt: eingehender Anruf
    ///
    /// Der Offer-Blob wird im Kontext geparkt, bis der Benutzer annimmt.
    /// Gibt `false` zurueck wenn bereits ein Anruf aktiv ist (der
    /// Aufrufer lehnt dann ab – "besetzt").
    pub fn eingehend(
        &mut self,
        partner: SessionToken,
        partner_name: String,
        signal: SignalBlob,
    ) -> bool {
        if self.zustand != AnrufZustand::Ruhend {
            return false;
        }
        let generation = self.generation_ziehen();
        self.zustand = AnrufZustand::Klingelt;
        self.kontext = Some(AnrufKontext {
            partner,
            partner_name: Some(partner_name),
            richtung: AnrufRichtung::Eingehend,
            wartendes_signal: Some(signal),
            generation,
        });
        true
    }

    /// WaehltAn -> Verbunden: Gegenstelle hat angenommen
    ///
    /// Gibt den Kontext zurueck, damit der Aufrufer den Answer-Blob an
    /// den Peer-Link weiterreichen kann. Nur gueltig wenn der Absender
    /// die angerufene Gegenstelle ist.
    pub fn angenommen(&mut self, von: SessionToken) -> Option<&AnrufKontext> {
        match &self.kontext {
            Some(k) if self.zustand == AnrufZustand::WaehltAn && k.partner == von => {
                self.zustand = AnrufZustand::Verbunden;
                self.kontext.as_ref()
            }
            _ => None,
        }
    }

    /// WaehltAn -> Ruhend: Gegenstelle hat abgelehnt (oder ist unerreichbar)
    pub fn abgelehnt(&mut self, von: SessionToken) -> bool {
        match &self.kontext {
            Some(k) if self.zustand == AnrufZustand::WaehltAn && k.partner == von => {
                self.zuruecksetzen();
                true
            }
            _ => false,
        }
    }

    /// Klingelt -> Verbunden: lokaler Benutzer nimmt an
    ///
    /// Gibt den geparkten Offer-Blob zurueck (wird an den Peer-Link
    /// uebergeben, damit dieser den Answer erzeugen kann).
    pub fn annehmen(&mut self) -> Option<(SessionToken, SignalBlob, u64)> {
        if self.zustand != AnrufZustand::Klingelt {
            return None;
        }
        let kontext = self.kontext.as_mut()?;
        let signal = kontext.wartendes_signal.take()?;
        let partner = kontext.partner;
        let generation = kontext.generation;
        self.zustand = AnrufZustand::Verbunden;
        Some((partner, signal, generation))
    }

    /// Klingelt -> Ruhend: lokaler Benutzer lehnt ab
    ///
    /// Gibt den Partner zurueck, an den `RejectCall` gesendet wird.
    pub fn ablehnen(&mut self) -> Option<SessionToken> {
        if self.zustand != AnrufZustand::Klingelt {
            return None;
        }
        let partner = self.kontext.as_ref()?.partner;
        self.zuruecksetzen();
        Some(partner)
    }

    /// Beliebiger aktiver Zustand -> Ruhend: lokales Auflegen
    ///
    /// Gibt den Partner zurueck, an den `EndCall` gesendet wird.
    pub fn beenden(&mut self) -> Option<SessionToken> {
        if self.zustand == AnrufZustand::Ruhend {
            return None;
        }
        let partner = self.kontext.as_ref()?.partner;
        self.zuruecksetzen();
        Some(partner)
    }

    /// Beliebiger aktiver Zustand -> Ruhend: Gegenstelle hat aufgelegt
    ///
    /// Nur gueltig wenn der Absender der aktuelle Partner ist – ein
    /// `CallEnded` eines frueheren Anrufs darf den neuen nicht beenden.
    pub fn beendet_von(&mut self, von: SessionToken) -> bool {
        match &self.kontext {
            Some(k) if k.partner == von => {
                self.zuruecksetzen();
                true
            }
            _ => false,
        }
    }

    /// Beliebiger aktiver Zustand -> Ruhend: lokaler Fehler (Peer-Link,
    /// Medien, Timeout)
    ///
    /// Gibt den Partner zurueck, falls die Gegenstelle informiert werden
    /// soll.
    pub fn fehlgeschlagen(&mut self) -> Option<SessionToken> {
        if self.zustand == AnrufZustand::Ruhend {
            return None;
        }
        let partner = self.kontext.as_ref()?.partner;
        self.zuruecksetzen();
        Some(partner)
    }

    fn zuruecksetzen(&mut self) {
        self.zustand = AnrufZustand::Ruhend;
        self.kontext = None;
    }
}

impl Default for AnrufMaschine {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
