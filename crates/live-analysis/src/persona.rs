//! Opponent personas.
//!
//! A persona is a strength and style setting for the engine that picks the
//! opponent's moves, expressed as the `setoption` values it needs.

use crate::engine::EngineOption;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaKind {
    Berserker,
    Gatekeeper,
    ShadowSelf,
    Prodigy,
    EndgameMaster,
}

/// Engine settings for one opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpponentPersona {
    pub kind: PersonaKind,
    pub name: &'static str,
    /// Target playing strength (`UCI_Elo`).
    pub elo: u32,
    /// Stockfish `Skill Level`, 0 to 20.
    pub skill_level: u8,
    /// Draw aversion; positive values avoid draws.
    pub contempt: i32,
    /// Thinking time per move.
    pub move_time_ms: u64,
}

const PERSONAS: [OpponentPersona; 5] = [
    OpponentPersona {
        kind: PersonaKind::Berserker,
        name: "The Berserker",
        elo: 1400,
        skill_level: 10,
        contempt: 100,
        move_time_ms: 1000,
    },
    OpponentPersona {
        kind: PersonaKind::Gatekeeper,
        name: "The Gatekeeper",
        elo: 1600,
        skill_level: 14,
        contempt: -50,
        move_time_ms: 3000,
    },
    OpponentPersona {
        kind: PersonaKind::ShadowSelf,
        name: "The Shadow Self",
        elo: 1800,
        skill_level: 16,
        contempt: 0,
        move_time_ms: 2000,
    },
    OpponentPersona {
        kind: PersonaKind::Prodigy,
        name: "The Prodigy",
        elo: 2200,
        skill_level: 20,
        contempt: 0,
        move_time_ms: 2500,
    },
    OpponentPersona {
        kind: PersonaKind::EndgameMaster,
        name: "The Endgame Master",
        elo: 1900,
        skill_level: 18,
        contempt: -25,
        move_time_ms: 3500,
    },
];

impl OpponentPersona {
    /// All built-in personas.
    pub fn all() -> &'static [OpponentPersona] {
        &PERSONAS
    }

    pub fn get(kind: PersonaKind) -> &'static OpponentPersona {
        match kind {
            PersonaKind::Berserker => &PERSONAS[0],
            PersonaKind::Gatekeeper => &PERSONAS[1],
            PersonaKind::ShadowSelf => &PERSONAS[2],
            PersonaKind::Prodigy => &PERSONAS[3],
            PersonaKind::EndgameMaster => &PERSONAS[4],
        }
    }

    /// The options to send during the handshake, in order.
    pub fn uci_options(&self) -> Vec<EngineOption> {
        vec![
            EngineOption::new("UCI_LimitStrength", "true"),
            EngineOption::new("UCI_Elo", self.elo.to_string()),
            EngineOption::new("Skill Level", self.skill_level.to_string()),
            EngineOption::new("Contempt", self.contempt.to_string()),
        ]
    }
}

impl PersonaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PersonaKind::Berserker => "berserker",
            PersonaKind::Gatekeeper => "gatekeeper",
            PersonaKind::ShadowSelf => "shadow_self",
            PersonaKind::Prodigy => "prodigy",
            PersonaKind::EndgameMaster => "endgame_master",
        }
    }
}

impl fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        PERSONAS
            .iter()
            .map(|p| p.kind)
            .find(|kind| kind.as_str() == key)
            .ok_or_else(|| format!("Unknown persona: {}", s))
    }
}
