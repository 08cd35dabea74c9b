// src/statistics.rs
// Contagem de qualidade dos lances da partida (resumo da análise)

use serde::{Deserialize, Serialize};

use crate::quality::MoveQuality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityTally {
    pub best:    u32,
    pub good:    u32,
    pub mistake: u32,
    pub blunder: u32,
}

impl QualityTally {
    pub fn from_labels<I: IntoIterator<Item = MoveQuality>>(labels: I) -> Self {
        let mut tally = Self::default();
        for q in labels { tally.record(q); }
        tally
    }

    pub fn record(&mut self, quality: MoveQuality) {
        *self.slot(quality) += 1;
    }

    pub fn get(&self, quality: MoveQuality) -> u32 {
        match quality {
            MoveQuality::Best    => self.best,
            MoveQuality::Good    => self.good,
            MoveQuality::Mistake => self.mistake,
            MoveQuality::Blunder => self.blunder,
        }
    }

    fn slot(&mut self, quality: MoveQuality) -> &mut u32 {
        match quality {
            MoveQuality::Best    => &mut self.best,
            MoveQuality::Good    => &mut self.good,
            MoveQuality::Mistake => &mut self.mistake,
            MoveQuality::Blunder => &mut self.blunder,
        }
    }

    pub fn total(&self) -> u32 {
        self.best + self.good + self.mistake + self.blunder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_label_once() {
        let mut tally = QualityTally::default();
        tally.record(MoveQuality::Good);
        tally.record(MoveQuality::Blunder);
        tally.record(MoveQuality::Good);
        assert_eq!(tally.get(MoveQuality::Good), 2);
        assert_eq!(tally.get(MoveQuality::Blunder), 1);
        assert_eq!(tally.get(MoveQuality::Best), 0);
        assert_eq!(tally.total(), 3);
        assert_eq!(tally, QualityTally::from_labels([MoveQuality::Good, MoveQuality::Good, MoveQuality::Blunder]));
    }

    #[test]
    fn serializes_with_lowercase_keys() {
        let json = serde_json::to_value(QualityTally { best: 1, ..Default::default() }).unwrap();
        assert_eq!(json["best"], 1);
        assert_eq!(json["blunder"], 0);
    }
}
