// src/clock.rs
// Controle de tempo ("3|2") e relógio por cor

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::Color;

/// Controle de tempo no formato do rótulo: "M|I" (minutos | incremento em s) ou "M".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub initial_secs:   u32,
    pub increment_secs: u32,
}

impl TimeControl {
    /// Interpreta o rótulo; `None` se não for numérico.
    pub fn parse(label: &str) -> Option<Self> {
        let mut parts = label.trim().splitn(2, '|');
        let minutes: u32 = parts.next()?.trim().parse().ok()?;
        let increment_secs = match parts.next() {
            Some(inc) => inc.trim().parse().ok()?,
            None      => 0,
        };
        Some(Self { initial_secs: minutes.saturating_mul(60), increment_secs })
    }

    /// Incremento do rótulo, 0 quando o rótulo é inválido.
    pub fn increment_of(label: &str) -> u32 {
        Self::parse(label).map(|tc| tc.increment_secs).unwrap_or(0)
    }
}

impl FromStr for TimeControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("controle de tempo inválido: {s}"))
    }
}

/// Segundos restantes de cada cor. Nunca negativo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Clock {
    pub white: u32,
    pub black: u32,
}

impl Clock {
    pub fn new(initial_secs: u32) -> Self {
        Self { white: initial_secs, black: initial_secs }
    }

    pub fn remaining(&self, color: Color) -> u32 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    fn slot(&mut self, color: Color) -> &mut u32 {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    /// Desconta um segundo (piso em zero); devolve `true` se o relógio está zerado.
    pub fn tick(&mut self, color: Color) -> bool {
        let slot = self.slot(color);
        *slot = slot.saturating_sub(1);
        *slot == 0
    }

    pub fn add_increment(&mut self, color: Color, increment_secs: u32) {
        let slot = self.slot(color);
        *slot = slot.saturating_add(increment_secs);
    }
}
