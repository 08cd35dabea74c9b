// src/rules.rs
// ---------------------------------------------------------------------------
// Adaptador de regras: toda mutação de posição passa por aqui.
// Funções puras sobre `Chess`; nenhum estado interno.
// ---------------------------------------------------------------------------

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use shakmaty::{
    fen::Fen, san::SanPlus, uci::UciMove, CastlingMode, Chess, Color, EnPassantMode, Move,
    Position, Rank, Role, Square,
};

use crate::error::IllegalMove;

/// Pedido de lance vindo da interface (origem, destino, promoção opcional).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub from:      Square,
    pub to:        Square,
    pub promotion: Option<Role>,
}

impl MoveRequest {
    /// Converte um lance já legal (ex.: vindo de SAN) em pedido.
    pub fn from_move(mv: &Move) -> Option<Self> {
        match UciMove::from_move(mv, CastlingMode::Standard) {
            UciMove::Normal { from, to, promotion } => Some(Self { from, to, promotion }),
            _ => None,
        }
    }
}

impl FromStr for MoveRequest {
    type Err = IllegalMove;

    /// Aceita notação UCI: "e2e4", "e7e8q".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || IllegalMove(format!("notação inválida: {s}"));
        if !(s.len() == 4 || s.len() == 5) || !s.is_ascii() { return Err(bad()); }
        let from: Square = s[0..2].parse().map_err(|_| bad())?;
        let to: Square = s[2..4].parse().map_err(|_| bad())?;
        let promotion = match s[4..].chars().next() {
            Some(c) => Some(Role::from_char(c.to_ascii_lowercase()).ok_or_else(bad)?),
            None    => None,
        };
        Ok(Self { from, to, promotion })
    }
}

impl fmt::Display for MoveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(role) = self.promotion { write!(f, "{}", role.char())?; }
        Ok(())
    }
}

/// Registro de um lance aplicado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub move_number: u32,   // Número do lance completo (fullmove) de quem jogou
    #[serde(with = "color_name")]
    pub color:       Color,
    pub san:         String,
    pub uci:         String,
    pub fen_after:   String,
}

impl MoveRecord {
    pub fn is_checkmate(&self) -> bool {
        self.san.ends_with('#')
    }
}

/// Valida e aplica um lance. Peão chegando à última fileira sem peça explícita vira dama.
pub fn apply_move(position: &Chess, request: &MoveRequest) -> Result<(Chess, MoveRecord), IllegalMove> {
    let promotion = request
        .promotion
        .or_else(|| reaches_last_rank(position, request).then_some(Role::Queen));
    let uci = UciMove::Normal { from: request.from, to: request.to, promotion };
    let mv = uci
        .to_move(position)
        .map_err(|_| IllegalMove(request.to_string()))?;

    let color = position.turn();
    let move_number = position.fullmoves().get();
    let mut next = position.clone();
    let san = SanPlus::from_move_and_play_unchecked(&mut next, &mv);

    let record = MoveRecord {
        move_number,
        color,
        san: san.to_string(),
        uci: UciMove::from_move(&mv, CastlingMode::Standard).to_string(),
        fen_after: to_fen(&next),
    };
    Ok((next, record))
}

/// Peão do lado a jogar indo para a última fileira.
fn reaches_last_rank(position: &Chess, request: &MoveRequest) -> bool {
    let Some(piece) = position.board().piece_at(request.from) else { return false };
    if piece.role != Role::Pawn || piece.color != position.turn() { return false; }
    let last = match piece.color {
        Color::White => Rank::Eighth,
        Color::Black => Rank::First,
    };
    request.to.rank() == last
}

/// Estado terminal da posição.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Checkmate { winner: Color },
    Draw,
    None,
}

pub fn terminal_state(position: &Chess) -> Terminal {
    if position.is_checkmate() {
        Terminal::Checkmate { winner: !position.turn() }
    } else if position.is_stalemate() || position.is_insufficient_material() {
        Terminal::Draw
    } else {
        Terminal::None
    }
}

/// Destinos legais a partir de uma casa (dica visual). Roque aparece como destino do rei.
pub fn legal_destinations(position: &Chess, square: Square) -> Vec<Square> {
    let mut out: Vec<Square> = position
        .legal_moves()
        .iter()
        .filter(|m| m.from() == Some(square))
        .filter_map(|m| match UciMove::from_move(m, CastlingMode::Standard) {
            UciMove::Normal { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

pub fn to_fen(position: &Chess) -> String {
    Fen::from_position(position.clone(), EnPassantMode::Legal).to_string()
}

pub fn parse_fen(fen: &str) -> anyhow::Result<Chess> {
    let parsed: Fen = fen.parse()?;
    Ok(parsed.into_position(CastlingMode::Standard)?)
}

/// Resultado no formato PGN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult { WhiteWins, BlackWins, Draw, Unfinished }

impl GameResult {
    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => GameResult::WhiteWins,
            Color::Black => GameResult::BlackWins,
        }
    }

    pub fn as_pgn(self) -> &'static str {
        match self {
            GameResult::WhiteWins  => "1-0",
            GameResult::BlackWins  => "0-1",
            GameResult::Draw       => "1/2-1/2",
            GameResult::Unfinished => "*",
        }
    }

    pub fn from_pgn(s: &str) -> Option<Self> {
        match s.trim() {
            "1-0"     => Some(GameResult::WhiteWins),
            "0-1"     => Some(GameResult::BlackWins),
            "1/2-1/2" => Some(GameResult::Draw),
            "*"       => Some(GameResult::Unfinished),
            _         => None,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_pgn())
    }
}

pub fn color_label(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

pub fn parse_color(s: &str) -> Option<Color> {
    match s.trim().to_ascii_lowercase().as_str() {
        "white" | "w" => Some(Color::White),
        "black" | "b" => Some(Color::Black),
        _ => None,
    }
}

/// Serde de `Color` como "white"/"black".
pub mod color_name {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use shakmaty::Color;

    pub fn serialize<S: Serializer>(color: &Color, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(super::color_label(*color))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Color, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_color(&raw).ok_or_else(|| D::Error::custom(format!("cor inválida: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(s: &str) -> MoveRequest {
        s.parse().unwrap()
    }

    fn play_all(moves: &[&str]) -> (Chess, Vec<MoveRecord>) {
        let mut pos = Chess::default();
        let mut records = Vec::new();
        for m in moves {
            let (next, rec) = apply_move(&pos, &req(m)).unwrap();
            pos = next;
            records.push(rec);
        }
        (pos, records)
    }

    #[test]
    fn applies_legal_move_and_records_it() {
        let (pos, rec) = apply_move(&Chess::default(), &req("e2e4")).unwrap();
        assert_eq!(rec.san, "e4");
        assert_eq!(rec.uci, "e2e4");
        assert_eq!(rec.move_number, 1);
        assert_eq!(rec.color, Color::White);
        assert_eq!(pos.turn(), Color::Black);
        assert_eq!(rec.fen_after, to_fen(&pos));
    }

    #[test]
    fn rejects_illegal_move_without_touching_input() {
        let start = Chess::default();
        assert!(apply_move(&start, &req("e2e5")).is_err());
        assert!(apply_move(&start, &req("e7e5")).is_err()); // lado errado
        assert_eq!(to_fen(&start), to_fen(&Chess::default()));
    }

    #[test]
    fn parses_uci_notation() {
        let r = req("e7e8q");
        assert_eq!(r.promotion, Some(Role::Queen));
        assert_eq!(r.to_string(), "e7e8q");
        assert!("e9e4".parse::<MoveRequest>().is_err());
        assert!("e2".parse::<MoveRequest>().is_err());
        assert!("e7e8x".parse::<MoveRequest>().is_err());
    }

    #[test]
    fn promotion_defaults_to_queen() {
        let pos = parse_fen("8/P7/8/8/8/8/8/k6K w - - 0 1").unwrap();
        let (next, rec) = apply_move(&pos, &req("a7a8")).unwrap();
        assert_eq!(rec.uci, "a7a8q");
        assert!(rec.san.starts_with("a8=Q"));
        assert_eq!(next.board().piece_at(Square::A8).map(|p| p.role), Some(Role::Queen));

        let (_, under) = apply_move(&pos, &req("a7a8n")).unwrap();
        assert_eq!(under.uci, "a7a8n");
    }

    #[test]
    fn castling_uses_king_destination() {
        let (pos, _) = play_all(&["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6"]);
        assert!(legal_destinations(&pos, Square::E1).contains(&Square::G1));
        let (_, rec) = apply_move(&pos, &req("e1g1")).unwrap();
        assert_eq!(rec.san, "O-O");
        assert_eq!(rec.uci, "e1g1");
    }

    #[test]
    fn legal_destinations_for_hints() {
        let start = Chess::default();
        assert_eq!(legal_destinations(&start, Square::E2), vec![Square::E3, Square::E4]);
        assert_eq!(legal_destinations(&start, Square::G1), vec![Square::F3, Square::H3]);
        assert!(legal_destinations(&start, Square::E7).is_empty());
        assert!(legal_destinations(&start, Square::E4).is_empty());
    }

    #[test]
    fn detects_checkmate_and_draw() {
        let (mate, records) = play_all(&["f2f3", "e7e5", "g2g4", "d8h4"]);
        assert_eq!(terminal_state(&mate), Terminal::Checkmate { winner: Color::Black });
        assert!(records.last().unwrap().is_checkmate());

        let stalemate = parse_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(terminal_state(&stalemate), Terminal::Draw);
        assert_eq!(terminal_state(&Chess::default()), Terminal::None);
    }

    #[test]
    fn fold_matches_the_rules_engine() {
        let moves = ["d2d4", "g8f6", "c2c4", "e7e6", "b1c3", "f8b4", "e2e3", "e8g8"];
        let (ours, _) = play_all(&moves);

        let mut theirs = Chess::default();
        for m in moves {
            let uci: UciMove = m.parse().unwrap();
            let mv = uci.to_move(&theirs).unwrap();
            theirs = theirs.play(&mv).unwrap();
        }
        assert_eq!(to_fen(&ours), to_fen(&theirs));
    }

    #[test]
    fn result_labels_round_trip() {
        for r in [GameResult::WhiteWins, GameResult::BlackWins, GameResult::Draw, GameResult::Unfinished] {
            assert_eq!(GameResult::from_pgn(r.as_pgn()), Some(r));
        }
        assert_eq!(GameResult::win_for(Color::Black).as_pgn(), "0-1");
    }
}
