//! Authentifizierungs-Policy fuer den Handshake
//!
//! Der Hub prueft nur ueber diesen Trait; woher Tokens und erlaubte Geraete
//! stammen, entscheidet der Host-Prozess.

use std::collections::HashSet;

/// Pruefungen waehrend des Handshakes
pub trait AuthPolicy: Send + Sync {
    /// true wenn das (optionale) Token akzeptiert wird
    fn token_validieren(&self, token: Option<&str>) -> bool;

    /// true wenn das Geraet sich verbinden darf
    fn geraet_erlaubt(&self, device_id: &str) -> bool;
}

/// Akzeptiert jedes Token und jedes Geraet
#[derive(Debug, Clone, Copy, Default)]
pub struct OffenePolicy;

impl AuthPolicy for OffenePolicy {
    fn token_validieren(&self, _token: Option<&str>) -> bool {
        true
    }

    fn geraet_erlaubt(&self, _device_id: &str) -> bool {
        true
    }
}

/// Policy aus statischer Konfiguration
///
/// Tokens werden nur geprueft wenn `aktiviert && token_erforderlich`,
/// Geraete nur wenn `aktiviert && geraete_pruefung` und die Liste nicht
/// leer ist.
#[derive(Debug, Clone, Default)]
pub struct StatischePolicy {
    pub aktiviert: bool,
    pub token_erforderlich: bool,
    pub tokens: HashSet<String>,
    pub geraete_pruefung: bool,
    pub erlaubte_geraete: HashSet<String>,
}

impl StatischePolicy {
    /// Policy mit Token-Pflicht
    pub fn mit_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aktiviert: true,
            token_erforderlich: true,
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Aktiviert die Geraete-Pruefung mit der gegebenen Liste
    pub fn geraete_erlauben<I, S>(mut self, geraete: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aktiviert = true;
        self.geraete_pruefung = true;
        self.erlaubte_geraete = geraete.into_iter().map(Into::into).collect();
        self
    }
}

impl AuthPolicy for StatischePolicy {
    fn token_validieren(&self, token: Option<&str>) -> bool {
        if !self.aktiviert || !self.token_erforderlich {
            return true;
        }
        match token {
            Some(t) if !t.is_empty() => self.tokens.contains(t),
            _ => false,
        }
    }

    fn geraet_erlaubt(&self, device_id: &str) -> bool {
        if !self.aktiviert || !self.geraete_pruefung || self.erlaubte_geraete.is_empty() {
            return true;
        }
        self.erlaubte_geraete.contains(device_id)
    }
}
