// src/lab.rs
// ---------------------------------------------------------------------------
// Laboratório: revisita os erros (Mistake/Blunder) das partidas gravadas.
// Cada exercício é a posição antes do lance errado; o mentor dá dica ou solução.
// ---------------------------------------------------------------------------

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use shakmaty::{Chess, Color};

use crate::{
    error::IllegalMove,
    mentor::MentorContext,
    quality::MoveQuality,
    rules::{self, MoveRecord, MoveRequest},
    session::GameSession,
    store::GameRecord,
};

const HINT_REQUEST: &str = "Dê uma dica sutil e irônica sobre o melhor lance nesta posição, \
sem revelar a resposta completa. Seja breve e característico do Aristóteles.";
const SOLUTION_REQUEST: &str = "Qual é o melhor lance nesta posição? Explique brevemente por que é superior.";

/// Erro de uma partida gravada, pronto para ser refeito.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabExercise {
    pub game_id:          String,
    pub played_at:        DateTime<Utc>,
    pub player_color:     Color,
    pub move_number:      u32,
    pub move_notation:    String,
    pub played_uci:       String,
    pub quality:          MoveQuality,
    pub commentary:       String,   // Comentário original do mentor
    pub evaluation_after: i32,
    pub fen:              String,   // Posição antes do erro
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabRequest { Hint, Solution }

/// Resultado de uma tentativa no tabuleiro do exercício.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Mesmo lance da partida.
    Repeated,
    /// Outro lance legal; cabe ao mentor dizer se foi melhor.
    Different(MoveRecord),
}

/// Junta os erros das partidas na ordem recebida (mais recente primeiro) e, dentro
/// de cada partida, na ordem dos lances. Partida que não se reconstrói é ignorada.
pub fn collect_errors(records: &[GameRecord]) -> Vec<LabExercise> {
    let mut exercises = Vec::new();
    for record in records {
        let session = match GameSession::restore(record) {
            Ok(session) => session,
            Err(e) => {
                warn!("partida {} fora do laboratório: {e:#}", record.game_id);
                continue;
            }
        };
        let moves = session.moves();
        for insight in record.insights.iter().filter(|i| i.quality.is_error()) {
            let Some(index) = moves
                .iter()
                .position(|m| m.move_number == insight.move_number && m.color == record.player_color)
            else {
                warn!("lance {} não encontrado na partida {}", insight.move_number, record.game_id);
                continue;
            };
            let fen = match index {
                0 => rules::to_fen(&Chess::default()),
                i => moves[i - 1].fen_after.clone(),
            };
            exercises.push(LabExercise {
                game_id:          record.game_id.clone(),
                played_at:        record.saved_at,
                player_color:     record.player_color,
                move_number:      insight.move_number,
                move_notation:    insight.move_notation.clone(),
                played_uci:       moves[index].uci.clone(),
                quality:          insight.quality,
                commentary:       insight.commentary.clone(),
                evaluation_after: insight.evaluation_after,
                fen,
            });
        }
    }
    debug!("{} erros coletados de {} partidas", exercises.len(), records.len());
    exercises
}

impl LabExercise {
    pub fn position(&self) -> Result<Chess> {
        rules::parse_fen(&self.fen).with_context(|| format!("exercício da partida {}", self.game_id))
    }

    /// Tenta um lance na posição do erro. Lance ilegal não muda nada.
    pub fn attempt(&self, request: &MoveRequest) -> Result<Attempt, IllegalMove> {
        let position = self.position().map_err(|e| IllegalMove(format!("{e:#}")))?;
        let (_, record) = rules::apply_move(&position, request)?;
        if record.uci == self.played_uci {
            Ok(Attempt::Repeated)
        } else {
            Ok(Attempt::Different(record))
        }
    }

    /// Contexto do mentor para a posição do erro com o pedido de dica ou solução.
    pub fn mentor_context(&self, request: LabRequest) -> MentorContext {
        let prompt = match request {
            LabRequest::Hint     => HINT_REQUEST,
            LabRequest::Solution => SOLUTION_REQUEST,
        };
        MentorContext {
            fen:            self.fen.clone(),
            last_move:      self.move_notation.clone(),
            quality:        self.quality,
            best_move:      None,
            evaluation:     self.evaluation_after,
            time_remaining: None,
            recent_moves:   Vec::new(),
            pgn:            None,
            user_prompt:    Some(prompt.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::Clock,
        mentor::build_prompt,
        rules::{apply_move, GameResult},
        session::{Insight, Termination},
        statistics::QualityTally,
    };

    /// Partida gravada com os lances dados e um insight por lance do jogador.
    fn record(game_id: &str, color: Color, ucis: &[&str], labels: &[MoveQuality]) -> GameRecord {
        let mut pos = Chess::default();
        let mut moves = Vec::new();
        for uci in ucis {
            let (next, rec) = apply_move(&pos, &uci.parse::<MoveRequest>().unwrap()).unwrap();
            pos = next;
            moves.push(rec);
        }
        let insights: Vec<Insight> = moves
            .iter()
            .filter(|m| m.color == color)
            .zip(labels)
            .map(|(m, q)| Insight {
                move_number: m.move_number,
                move_notation: m.san.clone(),
                quality: *q,
                commentary: format!("sobre {}", m.san),
                fen_after: m.fen_after.clone(),
                evaluation_after: -120,
                mentor_verdict: None,
            })
            .collect();
        GameRecord {
            game_id: game_id.into(),
            player_color: color,
            result: GameResult::win_for(!color),
            termination: Some(Termination::Resignation),
            pgn: format!("{} {}", crate::utils::movetext(&moves), GameResult::win_for(!color).as_pgn()),
            final_fen: rules::to_fen(&pos),
            analysis_summary: QualityTally::from_labels(labels.iter().copied()),
            insights,
            time_control: "10|0".into(),
            initial_time_secs: 600,
            increment_secs: 0,
            clock: Clock { white: 600, black: 600 },
            difficulty: 3,
            mentor_enabled: true,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn collects_only_errors_with_the_position_before_the_move() {
        let white = record(
            "g1",
            Color::White,
            &["e2e4", "e7e5", "d1h5", "b8c6"],
            &[MoveQuality::Good, MoveQuality::Blunder],
        );
        let black = record(
            "g2",
            Color::Black,
            &["e2e4", "f7f6", "d2d4", "g7g5"],
            &[MoveQuality::Mistake, MoveQuality::Best],
        );
        let exercises = collect_errors(&[white, black]);
        assert_eq!(exercises.len(), 2);

        let qh5 = &exercises[0];
        assert_eq!((qh5.game_id.as_str(), qh5.move_number, qh5.move_notation.as_str()), ("g1", 2, "Qh5"));
        assert_eq!(qh5.played_uci, "d1h5");
        assert_eq!(qh5.fen, "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2");
        assert_eq!(qh5.commentary, "sobre Qh5");

        let f6 = &exercises[1];
        assert_eq!((f6.game_id.as_str(), f6.quality, f6.move_notation.as_str()), ("g2", MoveQuality::Mistake, "f6"));
        assert_eq!(f6.fen, "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1");
    }

    #[test]
    fn unreplayable_games_are_skipped() {
        let mut broken = record("bad", Color::White, &["e2e4"], &[MoveQuality::Blunder]);
        broken.final_fen = rules::to_fen(&Chess::default());
        let good = record("ok", Color::White, &["g2g4"], &[MoveQuality::Blunder]);
        let exercises = collect_errors(&[broken, good]);
        assert_eq!(exercises.len(), 1);
        assert_eq!(exercises[0].game_id, "ok");
        assert_eq!(exercises[0].fen, rules::to_fen(&Chess::default()));
    }

    #[test]
    fn attempts_compare_with_the_original_move() {
        let exercises = collect_errors(&[record("g1", Color::White, &["e2e4", "e7e5", "d1h5"], &[MoveQuality::Good, MoveQuality::Blunder])]);
        let ex = &exercises[0];
        assert_eq!(ex.attempt(&"d1h5".parse().unwrap()), Ok(Attempt::Repeated));
        match ex.attempt(&"g1f3".parse().unwrap()) {
            Ok(Attempt::Different(rec)) => assert_eq!(rec.san, "Nf3"),
            other => panic!("esperava outro lance, veio {other:?}"),
        }
        assert!(ex.attempt(&"e1e3".parse().unwrap()).is_err());
    }

    #[test]
    fn hint_and_solution_requests_reach_the_prompt() {
        let exercises = collect_errors(&[record("g1", Color::White, &["e2e4", "e7e5", "d1h5"], &[MoveQuality::Good, MoveQuality::Blunder])]);
        let hint = build_prompt(&exercises[0].mentor_context(LabRequest::Hint));
        assert!(hint.contains("Pedido específico: Dê uma dica sutil"));
        assert!(hint.contains("Posição FEN: rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2"));
        let solution = build_prompt(&exercises[0].mentor_context(LabRequest::Solution));
        assert!(solution.contains("Pedido específico: Qual é o melhor lance"));
    }
}
