//! Liveness-Monitor – Schliesst inaktive Verbindungen
//!
//! Ein Timer-Task signalisiert nur; genau ein Worker-Task fuehrt den Sweep
//! aus. Ein langsamer Sweep staut daher keine Timer-Ticks auf und zwei
//! Sweeps laufen nie gleichzeitig.
//!
//! ```text
//! Timer --notify--> Worker --sweep--> Registry-Schnappschuss
//!                     ^
//!  Shutdown ----------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::registry::ClientRegistry;

pub struct LivenessMonitor {
    signal: Arc<Notify>,
    timer: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl LivenessMonitor {
    /// Startet Timer und Worker
    pub fn starten(
        registry: ClientRegistry,
        intervall: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let signal = Arc::new(Notify::new());

        let timer = {
            let signal = Arc::clone(&signal);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + intervall, intervall);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => signal.notify_one(),
                        Ok(()) = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let worker = {
            let signal = Arc::clone(&signal);
            let mut shutdown_rx = shutdown_rx;
            tokio::spawn(async move {
                tracing::debug!(intervall_sek = intervall.as_secs(), "Liveness-Monitor gestartet");
                loop {
                    tokio::select! {
                        _ = signal.notified() => {
                            let geschlossen = sweep(&registry, Instant::now());
                            if geschlossen > 0 {
                                tracing::info!(anzahl = geschlossen, "Inaktive Verbindungen geschlossen");
                            }
                        }
                        Ok(()) = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                tracing::debug!("Liveness-Monitor beendet");
            })
        };

        Self {
            signal,
            timer,
            worker,
        }
    }

    /// Loest ausserhalb des Intervalls einen Sweep aus
    pub fn anstossen(&self) {
        self.signal.notify_one();
    }

    /// Wartet begrenzt auf das Ende des Workers
    ///
    /// Gibt `false` zurueck, wenn der Worker nicht rechtzeitig fertig wurde;
    /// er wird dann abgebrochen.
    pub async fn stoppen(self, frist: Duration) -> bool {
        self.timer.abort();
        let abbruch = self.worker.abort_handle();
        match tokio::time::timeout(frist, self.worker).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(frist_ms = frist.as_millis() as u64, "Liveness-Monitor nicht rechtzeitig beendet");
                abbruch.abort();
                false
            }
        }
    }
}

/// Schliesst alle Verbindungen, deren Keepalive-Frist vor `jetzt` liegt
///
/// Arbeitet auf einem Schnappschuss; die Registry-Sperre ist waehrend des
/// Schliessens frei. Gibt die Anzahl geschlossener Verbindungen zurueck.
pub fn sweep(registry: &ClientRegistry, jetzt: Instant) -> usize {
    let mut geschlossen = 0;
    for conn in registry.schnappschuss() {
        if conn.ist_geschlossen() || !conn.keepalive_abgelaufen(jetzt) {
            continue;
        }
        tracing::info!(
            verbindung = %conn.id(),
            peer = %conn.peer_addr(),
            "Keepalive abgelaufen – Verbindung wird geschlossen"
        );
        conn.schliessen();
        geschlossen += 1;
    }
    geschlossen
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
