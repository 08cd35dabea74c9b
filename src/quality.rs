// src/quality.rs
// ---------------------------------------------------------------------------
// Classificador de qualidade do lance (função pura).
// ---------------------------------------------------------------------------

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::config::{BLUNDER_THRESHOLD, GOOD_THRESHOLD};

/// Rótulo ordinal de um lance humano.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MoveQuality { Best, Good, Mistake, Blunder }

impl MoveQuality {
    pub const ALL: [MoveQuality; 4] = [MoveQuality::Best, MoveQuality::Good, MoveQuality::Mistake, MoveQuality::Blunder];

    pub fn as_str(self) -> &'static str {
        match self {
            MoveQuality::Best    => "Best",
            MoveQuality::Good    => "Good",
            MoveQuality::Mistake => "Mistake",
            MoveQuality::Blunder => "Blunder",
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, MoveQuality::Mistake | MoveQuality::Blunder)
    }
}

impl fmt::Display for MoveQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoveQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoveQuality::ALL
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("qualidade desconhecida: {s}"))
    }
}

/// Metadados do lance que sobrepõem o delta numérico.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveFacts {
    pub is_checkmate:       bool,
    pub matches_engine_best: bool,
}

/// Classifica o lance a partir das avaliações antes/depois, ambas da perspectiva de quem jogou.
///
/// Mate ou lance igual ao sugerido pelo engine → `Best`. Sem avaliação pré-lance → `Good`.
/// Caso contrário, pelo delta: `<= -100` Blunder, `<= -30` Mistake, senão Good.
pub fn classify(pre_move_cp: Option<i32>, post_move_cp: i32, facts: MoveFacts) -> MoveQuality {
    if facts.is_checkmate || facts.matches_engine_best {
        return MoveQuality::Best;
    }
    let Some(pre) = pre_move_cp else { return MoveQuality::Good };
    let delta = post_move_cp.saturating_sub(pre);

    // Mais severo primeiro
    if delta <= BLUNDER_THRESHOLD {
        MoveQuality::Blunder
    } else if delta <= GOOD_THRESHOLD {
        MoveQuality::Mistake
    } else {
        MoveQuality::Good
    }
}
