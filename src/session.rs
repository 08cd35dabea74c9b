// src/session.rs
// ---------------------------------------------------------------------------
// Máquina de estados da partida. Dono único da posição, do relógio e do
// histórico de insights; todo efeito assíncrono volta por aqui como evento.
// ---------------------------------------------------------------------------
//  Pending → Active → Concluding → Closed
//  Sub-estado por lance: Idle → AwaitingEvaluation → AwaitingCommentary → Idle
// ---------------------------------------------------------------------------

use indexmap::IndexMap;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Color, Position, Square};
use uuid::Uuid;

use anyhow::{bail, Context};

use crate::{
    clock::{Clock, TimeControl},
    config::{DEFAULT_INITIAL_SECS, DEFAULT_LEVEL, DEFAULT_TIME_CONTROL, MIN_ANALYSIS_DEPTH, MOMENTUM_WINDOW},
    engine::{EvaluationSnapshot, SearchDepth},
    error::{IllegalMove, MentorError, SessionError},
    mentor::{Commentary, MentorContext, QualityVerdict, RecentMove},
    quality::{classify, MoveFacts, MoveQuality},
    rules::{self, color_label, GameResult, MoveRecord, MoveRequest, Terminal},
    statistics::QualityTally,
    store::GameRecord,
    utils,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status { Pending, Active, Concluding, Closed }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisPhase { Idle, AwaitingEvaluation, AwaitingCommentary }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination { Checkmate, Draw, Resignation, TimeForfeit }

/// Configuração de início; fixa para toda a sessão.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub game_id:           String,
    pub color:             Color,
    pub initial_time_secs: u32,
    pub time_control:      String,
    pub mentor_enabled:    bool,
    pub difficulty:        u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            game_id:           Uuid::new_v4().to_string(),
            color:             Color::White,
            initial_time_secs: DEFAULT_INITIAL_SECS,
            time_control:      DEFAULT_TIME_CONTROL.into(),
            mentor_enabled:    true,
            difficulty:        DEFAULT_LEVEL,
        }
    }
}

/// Lance humano analisado e comentado. Imutável depois de anexado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub move_number:      u32,
    pub move_notation:    String,
    pub quality:          MoveQuality,
    pub commentary:       String,
    pub fen_after:        String,
    pub evaluation_after: i32,                    // cp, perspectiva de quem jogou
    #[serde(default)]
    pub mentor_verdict:   Option<QualityVerdict>, // Rótulo do mentor, separado do numérico
}

/// Análise em andamento do último lance humano.
#[derive(Debug, Clone)]
struct PendingAnalysis {
    record:           MoveRecord,
    pre_move_cp:      Option<i32>,
    pre_move_best:    Option<String>,
    quality:          Option<MoveQuality>,
    evaluation_after: i32,
}

/// Lance do engine pronto para ser aplicado depois do atraso.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineMovePlan {
    pub fen: String,
    pub uci: String,
}

/// Pedido de comentário para o lance `move_number`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentaryRequest {
    pub move_number: u32,
    pub context:     MentorContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveApplied {
    pub record:           MoveRecord,
    pub analysis_started: bool,
    pub game_over:        Option<(GameResult, Termination)>,
}

#[derive(Debug, Default)]
pub struct BestMoveOutcome {
    pub commentary:  Option<CommentaryRequest>,
    pub engine_move: Option<EngineMovePlan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Inactive,
    Running,
    Flagged { color: Color, result: GameResult },
}

/// Estado só de interface: casa selecionada com dicas, e setas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    pub selected: Option<Square>,
    pub hints:    Vec<Square>,
    pub arrows:   Vec<(Square, Square)>,
}

impl Annotations {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Visão somente-leitura para a interface.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub game_id:         Option<String>,
    pub status:          Status,
    pub analysis:        AnalysisPhase,
    pub fen:             String,
    pub turn:            Color,
    pub user_color:      Color,
    pub clock:           Clock,
    pub last_move:       Option<MoveRecord>,
    pub move_count:      usize,
    pub insights:        usize,
    pub tally:           QualityTally,
    pub result:          GameResult,
    pub termination:     Option<Termination>,
    pub evaluation:      Option<EvaluationSnapshot>,
    pub evaluator_ready: bool,
    pub annotations:     Annotations,
}

pub struct GameSession {
    config:          SessionConfig,
    game_id:         Option<String>,
    status:          Status,
    position:        Chess,
    clock:           Clock,
    increment_secs:  u32,
    moves:           Vec<MoveRecord>,
    insights:        Vec<Insight>,
    tally:           QualityTally,
    result:          GameResult,
    termination:     Option<Termination>,
    analysis:        AnalysisPhase,
    pending:         Option<PendingAnalysis>,
    evaluator_ready: bool,
    evaluation:      Option<EvaluationSnapshot>, // Sempre da posição atual
    best_move:       Option<String>,             // `bestmove` da posição atual
    planned_fen:     Option<String>,             // Posição que já gerou lance do engine
    annotations:     Annotations,
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSession {
    /// Sessão em `Pending`, sem configuração aplicada.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    fn with_config(config: SessionConfig) -> Self {
        let increment_secs = TimeControl::increment_of(&config.time_control);
        Self {
            clock: Clock::new(config.initial_time_secs),
            increment_secs,
            config,
            game_id: None,
            status: Status::Pending,
            position: Chess::default(),
            moves: Vec::new(),
            insights: Vec::new(),
            tally: QualityTally::default(),
            result: GameResult::Unfinished,
            termination: None,
            analysis: AnalysisPhase::Idle,
            pending: None,
            evaluator_ready: false,
            evaluation: None,
            best_move: None,
            planned_fen: None,
            annotations: Annotations::default(),
        }
    }

    /// Pending → Active. Zera posição, relógios, insights e contagem.
    pub fn start(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        if self.status != Status::Pending {
            return Err(SessionError::AlreadyStarted(self.status));
        }
        let evaluator_ready = self.evaluator_ready;
        *self = Self::with_config(config);
        self.evaluator_ready = evaluator_ready;
        self.game_id = Some(self.config.game_id.clone());
        self.status = Status::Active;
        info!(
            "partida {} iniciada: jogador {}, {} ({}s, +{}s), nível {}, mentor {}",
            self.config.game_id,
            color_label(self.config.color),
            self.config.time_control,
            self.config.initial_time_secs,
            self.increment_secs,
            self.config.difficulty,
            if self.config.mentor_enabled { "ligado" } else { "desligado" },
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lances
    // -----------------------------------------------------------------------

    pub fn apply_human_move(&mut self, request: &MoveRequest) -> Result<MoveApplied, SessionError> {
        if self.status != Status::Active {
            return Err(SessionError::NotActive(self.status));
        }
        if !self.is_human_turn() {
            return Err(SessionError::NotHumanTurn);
        }
        // Só a avaliação bloqueia; ela fecha no próximo `bestmove`
        if self.analysis == AnalysisPhase::AwaitingEvaluation {
            return Err(SessionError::AnalysisPending);
        }

        let (next, record) = match rules::apply_move(&self.position, request) {
            Ok(applied) => applied,
            Err(e) => {
                self.annotations.clear();
                debug!("lance recusado: {e}");
                return Err(e.into());
            }
        };

        // Comentário do lance anterior ainda no mentor: fica obsoleto, sem insight
        if self.analysis == AnalysisPhase::AwaitingCommentary {
            self.abandon_analysis();
        }

        // Avaliação pré-lance: a posição atual, do ponto de vista de quem joga
        let pre_move_cp = self.evaluation.as_ref().map(EvaluationSnapshot::centipawns);
        let pre_move_best = self
            .best_move
            .clone()
            .or_else(|| self.evaluation.as_ref().and_then(|s| s.suggested_move().map(str::to_string)));

        self.commit(next, record.clone());

        let analysis_started = self.config.mentor_enabled && self.evaluator_ready;
        if analysis_started {
            self.pending = Some(PendingAnalysis {
                record: record.clone(),
                pre_move_cp,
                pre_move_best,
                quality: None,
                evaluation_after: 0,
            });
            self.analysis = AnalysisPhase::AwaitingEvaluation;
        } else {
            trace!("lance {} sem análise (mentor ou avaliador indisponível)", record.san);
        }

        let game_over = self.check_terminal();
        Ok(MoveApplied { record, analysis_started, game_over })
    }

    /// Aplica o lance planejado se ele ainda corresponde à posição viva.
    pub fn apply_engine_move(&mut self, plan: &EngineMovePlan) -> Result<Option<MoveApplied>, SessionError> {
        if self.status != Status::Active || self.is_human_turn() || self.fen() != plan.fen {
            trace!("plano do engine descartado: {}", plan.uci);
            return Ok(None);
        }
        let request: MoveRequest = plan.uci.parse()?;
        let (next, record) = rules::apply_move(&self.position, &request)?;
        self.commit(next, record.clone());
        let game_over = self.check_terminal();
        Ok(Some(MoveApplied { record, analysis_started: false, game_over }))
    }

    fn commit(&mut self, next: Chess, record: MoveRecord) {
        self.position = next;
        self.clock.add_increment(record.color, self.increment_secs);
        self.moves.push(record);
        self.annotations.clear();
        self.evaluation = None;
        self.best_move = None;
        self.planned_fen = None;
    }

    fn check_terminal(&mut self) -> Option<(GameResult, Termination)> {
        let outcome = match rules::terminal_state(&self.position) {
            Terminal::Checkmate { winner } => (GameResult::win_for(winner), Termination::Checkmate),
            Terminal::Draw                 => (GameResult::Draw, Termination::Draw),
            Terminal::None                 => return None,
        };
        self.conclude(outcome.0, outcome.1);
        Some(outcome)
    }

    fn conclude(&mut self, result: GameResult, termination: Termination) {
        self.result = result;
        self.termination = Some(termination);
        self.status = Status::Concluding;
        self.annotations.clear();
        info!("partida encerrada: {result} ({termination:?})");
    }

    // -----------------------------------------------------------------------
    // Eventos do avaliador
    // -----------------------------------------------------------------------

    /// Avaliador ficou pronto ou foi perdido. Perda abandona a análise que ainda
    /// esperava avaliação; um lance já classificado segue aguardando o mentor.
    pub fn set_evaluator_ready(&mut self, ready: bool) {
        self.evaluator_ready = ready;
        if !ready {
            self.evaluation = None;
            self.best_move = None;
            if self.analysis == AnalysisPhase::AwaitingEvaluation {
                warn!("avaliador indisponível; análise do lance pendente abandonada");
                self.abandon_analysis();
            }
        }
    }

    /// Atualização parcial. Resultado de posição antiga é descartado em silêncio.
    pub fn on_evaluation(&mut self, fen: &str, snapshot: EvaluationSnapshot) -> Option<CommentaryRequest> {
        if fen != self.fen() {
            trace!("avaliação obsoleta descartada: {fen}");
            return None;
        }
        // Linha com lowerbound/upperbound atualiza a avaliação mas não fecha a análise
        let settled = !snapshot.bound && snapshot.depth >= self.settle_depth();
        self.evaluation = Some(snapshot);
        if settled && self.analysis == AnalysisPhase::AwaitingEvaluation {
            return self.finish_evaluation();
        }
        None
    }

    /// Fim de uma busca: fecha a análise (se ainda aberta) e planeja o lance do engine.
    pub fn on_best_move(&mut self, fen: &str, best_move: Option<String>) -> BestMoveOutcome {
        let mut outcome = BestMoveOutcome::default();
        if fen != self.fen() {
            trace!("bestmove obsoleto descartado: {fen}");
            return outcome;
        }
        self.best_move = best_move.clone();
        if let Some(snapshot) = self.evaluation.as_mut() {
            snapshot.best_move = best_move.clone();
        }

        if self.analysis == AnalysisPhase::AwaitingEvaluation {
            if self.evaluation.is_some() {
                outcome.commentary = self.finish_evaluation();
            } else {
                warn!("busca terminou sem avaliação; lance fica sem insight");
                self.abandon_analysis();
            }
        }

        let engine_turn = self.status == Status::Active && !self.is_human_turn() && self.evaluator_ready;
        let already_planned = self.planned_fen.as_deref() == Some(fen);
        if engine_turn && !already_planned {
            if let Some(uci) = best_move {
                self.planned_fen = Some(fen.to_string());
                outcome.engine_move = Some(EngineMovePlan { fen: fen.to_string(), uci });
            }
        }
        outcome
    }

    /// Classifica o lance pendente com a avaliação atual e monta o contexto do mentor.
    fn finish_evaluation(&mut self) -> Option<CommentaryRequest> {
        let snapshot = self.evaluation.as_ref()?;
        // Avaliação é de quem joga agora (o oponente); inverte para quem jogou
        let post_cp = snapshot.centipawns().saturating_neg();
        let fen = self.fen();
        let time_remaining;
        let context_quality;
        let (move_number, last_move, best_move) = {
            let pending = self.pending.as_mut()?;
            let facts = MoveFacts {
                is_checkmate:        pending.record.is_checkmate(),
                matches_engine_best: pending.pre_move_best.as_deref() == Some(pending.record.uci.as_str()),
            };
            let quality = classify(pending.pre_move_cp, post_cp, facts);
            pending.quality = Some(quality);
            pending.evaluation_after = post_cp;
            context_quality = quality;
            time_remaining = self.clock.remaining(pending.record.color);
            debug!(
                "lance {} classificado como {quality} (antes {:?}, depois {post_cp})",
                pending.record.san, pending.pre_move_cp
            );
            (pending.record.move_number, pending.record.san.clone(), pending.pre_move_best.clone())
        };
        self.analysis = AnalysisPhase::AwaitingCommentary;

        let context = MentorContext {
            fen,
            last_move,
            quality: context_quality,
            best_move,
            evaluation: post_cp,
            time_remaining: Some(time_remaining),
            recent_moves: self.recent_moves(move_number, context_quality),
            pgn: Some(utils::movetext(&self.moves)),
            user_prompt: None,
        };
        Some(CommentaryRequest { move_number, context })
    }

    /// Últimos lances da partida; os do jogador levam o rótulo que receberam.
    fn recent_moves(&self, current: u32, current_quality: MoveQuality) -> Vec<RecentMove> {
        let start = self.moves.len().saturating_sub(MOMENTUM_WINDOW);
        self.moves[start..]
            .iter()
            .map(|m| {
                let quality = if m.color != self.config.color {
                    None
                } else if m.move_number == current {
                    Some(current_quality)
                } else {
                    self.insights.iter().find(|i| i.move_number == m.move_number).map(|i| i.quality)
                };
                RecentMove { notation: m.san.clone(), quality }
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Comentário do mentor
    // -----------------------------------------------------------------------

    /// Resposta do mentor para `move_number`. Falha ou resposta atrasada: nenhum insight.
    pub fn on_commentary(&mut self, move_number: u32, result: Result<Commentary, MentorError>) -> Option<Insight> {
        let matches = self.analysis == AnalysisPhase::AwaitingCommentary
            && self.pending.as_ref().is_some_and(|p| p.record.move_number == move_number);
        if !matches {
            trace!("comentário obsoleto para o lance {move_number} descartado");
            return None;
        }
        let pending = self.pending.take()?;
        self.analysis = AnalysisPhase::Idle;

        let commentary = match result {
            Ok(c) => c,
            Err(e) => {
                warn!("mentor falhou no lance {}: {e}", pending.record.san);
                return None;
            }
        };
        let quality = pending.quality?;
        if self.insights.last().is_some_and(|last| last.move_number >= move_number) {
            warn!("insight fora de ordem para o lance {move_number}; ignorado");
            return None;
        }
        let insight = Insight {
            move_number,
            move_notation: pending.record.san,
            quality,
            commentary: commentary.text,
            fen_after: pending.record.fen_after,
            evaluation_after: pending.evaluation_after,
            mentor_verdict: Some(commentary.verdict),
        };
        self.tally.record(quality);
        self.insights.push(insight.clone());
        Some(insight)
    }

    /// Descarta a análise em andamento (avaliador perdido, prazo esgotado).
    pub fn abandon_analysis(&mut self) {
        if let Some(p) = self.pending.take() {
            debug!("análise do lance {} abandonada", p.record.san);
        }
        self.analysis = AnalysisPhase::Idle;
    }

    // -----------------------------------------------------------------------
    // Relógio e fim de jogo
    // -----------------------------------------------------------------------

    /// Um segundo para quem está com a vez. Zerar encerra a partida uma única vez.
    pub fn tick(&mut self) -> TickOutcome {
        if self.status != Status::Active {
            return TickOutcome::Inactive;
        }
        let color = self.position.turn();
        if !self.clock.tick(color) {
            return TickOutcome::Running;
        }
        let result = if self.position.has_insufficient_material(!color) {
            GameResult::Draw
        } else {
            GameResult::win_for(!color)
        };
        info!("tempo esgotado para {}", color_label(color));
        self.conclude(result, Termination::TimeForfeit);
        TickOutcome::Flagged { color, result }
    }

    /// Desistência do jogador: vitória da outra cor.
    pub fn resign(&mut self) -> Result<GameResult, SessionError> {
        if self.status != Status::Active {
            return Err(SessionError::NotActive(self.status));
        }
        let result = GameResult::win_for(!self.config.color);
        self.conclude(result, Termination::Resignation);
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Persistência
    // -----------------------------------------------------------------------

    /// Em `Concluding` e sem análise pendente.
    pub fn ready_to_persist(&self) -> bool {
        self.status == Status::Concluding && self.analysis == AnalysisPhase::Idle
    }

    pub fn record(&self) -> Result<GameRecord, SessionError> {
        if self.status != Status::Concluding {
            return Err(SessionError::NothingToPersist(self.status));
        }
        let game_id = self.game_id.clone().unwrap_or_else(|| self.config.game_id.clone());
        Ok(GameRecord {
            game_id,
            player_color: self.config.color,
            result: self.result,
            termination: self.termination,
            pgn: self.pgn(),
            final_fen: self.fen(),
            analysis_summary: self.tally,
            insights: self.insights.clone(),
            time_control: self.config.time_control.clone(),
            initial_time_secs: self.config.initial_time_secs,
            increment_secs: self.increment_secs,
            clock: self.clock,
            difficulty: self.config.difficulty,
            mentor_enabled: self.config.mentor_enabled,
            saved_at: chrono::Utc::now(),
        })
    }

    /// Concluding → Closed, depois de gravado.
    pub fn mark_persisted(&mut self) -> Result<(), SessionError> {
        if self.status != Status::Concluding {
            return Err(SessionError::NothingToPersist(self.status));
        }
        self.status = Status::Closed;
        if let Some(id) = self.game_id.take() {
            info!("partida {id} gravada");
        }
        Ok(())
    }

    pub fn pgn(&self) -> String {
        let engine_name = format!("Stockfish (nível {})", self.config.difficulty);
        let (white, black) = match self.config.color {
            Color::White => ("Jogador".to_string(), engine_name),
            Color::Black => (engine_name, "Jogador".to_string()),
        };
        let mut headers: IndexMap<&str, String> = IndexMap::new();
        headers.insert("Event", "Chess Mentor".into());
        headers.insert("Site", "local".into());
        headers.insert("Date", chrono::Local::now().format("%Y.%m.%d").to_string());
        headers.insert("White", white);
        headers.insert("Black", black);
        headers.insert("Result", self.result.as_pgn().into());
        headers.insert("TimeControl", format!("{}+{}", self.config.initial_time_secs, self.increment_secs));
        headers.insert("GameId", self.config.game_id.clone());
        utils::build_pgn(&headers, &self.moves, self.result)
    }

    /// Reconstrói uma partida gravada refazendo o PGN pelo adaptador de regras.
    pub fn restore(record: &GameRecord) -> anyhow::Result<Self> {
        let config = SessionConfig {
            game_id:           record.game_id.clone(),
            color:             record.player_color,
            initial_time_secs: record.initial_time_secs,
            time_control:      record.time_control.clone(),
            mentor_enabled:    record.mentor_enabled,
            difficulty:        record.difficulty,
        };
        let mut session = Self::with_config(config);

        for (i, san) in utils::read_movetext(&record.pgn)?.into_iter().enumerate() {
            let mv = san
                .san
                .to_move(&session.position)
                .with_context(|| format!("lance {} ({san}) ilegal na partida {}", i + 1, record.game_id))?;
            let request = MoveRequest::from_move(&mv)
                .ok_or_else(|| IllegalMove(san.to_string()))
                .with_context(|| format!("lance {} sem forma UCI", i + 1))?;
            let (next, rec) = rules::apply_move(&session.position, &request)?;
            session.position = next;
            session.moves.push(rec);
        }
        if session.fen() != record.final_fen {
            bail!("FEN final não confere para a partida {}: {} != {}", record.game_id, session.fen(), record.final_fen);
        }

        session.increment_secs = record.increment_secs;
        session.clock = record.clock;
        session.insights = record.insights.clone();
        session.tally = QualityTally::from_labels(record.insights.iter().map(|i| i.quality));
        session.result = record.result;
        session.termination = record.termination;
        session.status = Status::Closed;
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Anotações de interface
    // -----------------------------------------------------------------------

    /// Seleciona uma peça do jogador e devolve os destinos legais. Repetir a casa limpa.
    pub fn select_square(&mut self, square: Square) -> &[Square] {
        let own_piece = self
            .position
            .board()
            .piece_at(square)
            .is_some_and(|p| p.color == self.config.color);
        if self.annotations.selected == Some(square) || !own_piece || self.status != Status::Active || !self.is_human_turn() {
            self.annotations.selected = None;
            self.annotations.hints.clear();
        } else {
            self.annotations.selected = Some(square);
            self.annotations.hints = rules::legal_destinations(&self.position, square);
        }
        &self.annotations.hints
    }

    /// Liga/desliga uma seta; devolve `true` se ela ficou visível.
    pub fn toggle_arrow(&mut self, from: Square, to: Square) -> bool {
        let arrows = &mut self.annotations.arrows;
        if let Some(i) = arrows.iter().position(|a| *a == (from, to)) {
            arrows.remove(i);
            false
        } else {
            arrows.push((from, to));
            true
        }
    }

    // -----------------------------------------------------------------------
    // Leitura
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            game_id:         self.game_id.clone(),
            status:          self.status,
            analysis:        self.analysis,
            fen:             self.fen(),
            turn:            self.position.turn(),
            user_color:      self.config.color,
            clock:           self.clock,
            last_move:       self.moves.last().cloned(),
            move_count:      self.moves.len(),
            insights:        self.insights.len(),
            tally:           self.tally,
            result:          self.result,
            termination:     self.termination,
            evaluation:      self.evaluation.clone(),
            evaluator_ready: self.evaluator_ready,
            annotations:     self.annotations.clone(),
        }
    }

    pub fn fen(&self) -> String { rules::to_fen(&self.position) }
    pub fn position(&self) -> &Chess { &self.position }
    pub fn status(&self) -> Status { self.status }
    pub fn analysis(&self) -> AnalysisPhase { self.analysis }
    pub fn config(&self) -> &SessionConfig { &self.config }
    pub fn game_id(&self) -> Option<&str> { self.game_id.as_deref() }
    pub fn user_color(&self) -> Color { self.config.color }
    pub fn clock(&self) -> Clock { self.clock }
    pub fn increment_secs(&self) -> u32 { self.increment_secs }
    pub fn moves(&self) -> &[MoveRecord] { &self.moves }
    pub fn insights(&self) -> &[Insight] { &self.insights }
    pub fn tally(&self) -> QualityTally { self.tally }
    pub fn result(&self) -> GameResult { self.result }
    pub fn termination(&self) -> Option<Termination> { self.termination }
    pub fn annotations(&self) -> &Annotations { &self.annotations }
    pub fn evaluator_ready(&self) -> bool { self.evaluator_ready }

    pub fn is_human_turn(&self) -> bool {
        self.position.turn() == self.config.color
    }

    pub fn search_depth(&self) -> SearchDepth {
        SearchDepth::Level(self.config.difficulty)
    }

    /// Profundidade a partir da qual a avaliação fecha a análise do lance.
    fn settle_depth(&self) -> u8 {
        MIN_ANALYSIS_DEPTH.min(self.search_depth().plies())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Score;
    use crate::mentor::VerdictSource;

    fn config(color: Color) -> SessionConfig {
        SessionConfig {
            game_id: "test-game".into(),
            color,
            initial_time_secs: 180,
            time_control: "3|2".into(),
            mentor_enabled: true,
            difficulty: 3,
        }
    }

    fn started(color: Color) -> GameSession {
        let mut s = GameSession::new();
        s.set_evaluator_ready(true);
        s.start(config(color)).unwrap();
        s
    }

    fn mv(uci: &str) -> MoveRequest {
        uci.parse().unwrap()
    }

    fn eval(depth: u8, cp: i32) -> EvaluationSnapshot {
        EvaluationSnapshot { depth, score: Score::Cp(cp), pv: Vec::new(), best_move: None, bound: false }
    }

    fn commentary(text: &str) -> Result<Commentary, MentorError> {
        Ok(Commentary {
            text: text.into(),
            verdict: QualityVerdict { label: MoveQuality::Good, source: VerdictSource::Heuristic },
            model: "fake".into(),
        })
    }

    /// Joga um lance humano e fecha toda a análise com a avaliação pós-lance dada.
    fn human_move_with_insight(s: &mut GameSession, uci: &str, post_cp_for_side_to_move: i32) -> Option<Insight> {
        let applied = s.apply_human_move(&mv(uci)).unwrap();
        let fen = s.fen();
        let request = s.on_evaluation(&fen, eval(12, post_cp_for_side_to_move))?;
        s.on_commentary(applied.record.move_number, commentary("ok"))
            .filter(|_| request.move_number == applied.record.move_number)
    }

    #[test]
    fn start_only_from_pending() {
        let mut s = GameSession::new();
        assert_eq!(s.status(), Status::Pending);
        assert!(matches!(s.apply_human_move(&mv("e2e4")), Err(SessionError::NotActive(Status::Pending))));
        s.start(config(Color::White)).unwrap();
        assert_eq!(s.status(), Status::Active);
        assert_eq!(s.game_id(), Some("test-game"));
        assert_eq!(s.increment_secs(), 2);
        assert!(matches!(s.start(config(Color::White)), Err(SessionError::AlreadyStarted(Status::Active))));
    }

    #[test]
    fn illegal_move_changes_nothing_and_clears_selection() {
        let mut s = started(Color::White);
        s.select_square(Square::E2);
        let before = s.fen();
        assert!(matches!(s.apply_human_move(&mv("e2e5")), Err(SessionError::IllegalMove(_))));
        assert_eq!(s.fen(), before);
        assert!(s.moves().is_empty());
        assert_eq!(s.annotations(), &Annotations::default());
    }

    #[test]
    fn rejects_moves_out_of_turn_and_while_evaluation_pending() {
        let mut s = started(Color::Black);
        assert!(matches!(s.apply_human_move(&mv("e2e4")), Err(SessionError::NotHumanTurn)));

        // Posição montada com as brancas de novo na vez e a avaliação ainda aberta
        let mut s = started(Color::White);
        s.apply_human_move(&mv("e2e4")).unwrap();
        assert_eq!(s.analysis(), AnalysisPhase::AwaitingEvaluation);
        s.position = rules::parse_fen("rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2").unwrap();
        assert!(matches!(s.apply_human_move(&mv("g1f3")), Err(SessionError::AnalysisPending)));
        assert_eq!(s.moves().len(), 1);
    }

    #[test]
    fn pending_commentary_does_not_block_the_next_move() {
        let mut s = started(Color::White);
        s.apply_human_move(&mv("e2e4")).unwrap();
        // Engine responde enquanto o mentor ainda pensa no e4
        let fen = s.fen();
        assert!(s.on_evaluation(&fen, eval(4, -5)).is_none());
        let outcome = s.on_best_move(&fen, Some("e7e5".into()));
        let first = outcome.commentary.unwrap();
        s.apply_engine_move(&outcome.engine_move.unwrap()).unwrap().unwrap();
        assert_eq!(s.analysis(), AnalysisPhase::AwaitingCommentary);

        let applied = s.apply_human_move(&mv("g1f3")).unwrap();
        assert!(applied.analysis_started);
        assert_eq!(s.analysis(), AnalysisPhase::AwaitingEvaluation);

        // Comentário do e4 chega depois: obsoleto, nenhum insight para aquele lance
        assert!(s.on_commentary(first.move_number, commentary("tarde")).is_none());
        assert!(s.insights().is_empty());
        assert_eq!(s.tally().total(), 0);

        let fen = s.fen();
        let second = s.on_evaluation(&fen, eval(12, -20)).unwrap();
        assert_eq!(second.move_number, 2);
        let insight = s.on_commentary(2, commentary("ok")).unwrap();
        assert_eq!(insight.move_notation, "Nf3");
        assert_eq!(s.insights().len(), 1);
    }

    #[test]
    fn bound_lines_do_not_settle_analysis() {
        let mut s = started(Color::White);
        s.apply_human_move(&mv("e2e4")).unwrap();
        let fen = s.fen();
        let bound = EvaluationSnapshot { bound: true, ..eval(15, -40) };
        assert!(s.on_evaluation(&fen, bound).is_none());
        assert_eq!(s.analysis(), AnalysisPhase::AwaitingEvaluation);
        assert_eq!(s.snapshot().evaluation.map(|e| e.depth), Some(15));
        assert!(s.on_evaluation(&fen, eval(15, -20)).is_some());
    }

    #[test]
    fn extreme_engine_scores_do_not_overflow() {
        let mut s = started(Color::White);
        s.apply_human_move(&mv("e2e4")).unwrap();
        let fen = s.fen();
        let request = s.on_evaluation(&fen, eval(12, i32::MIN)).unwrap();
        assert_eq!(request.context.evaluation, i32::MAX);
        assert_eq!(request.context.quality, MoveQuality::Good);
    }

    #[test]
    fn classifies_good_then_blunder() {
        let mut s = started(Color::White);
        let start_fen = s.fen();
        assert!(s.on_evaluation(&start_fen, eval(12, 0)).is_none());

        let first = human_move_with_insight(&mut s, "e2e4", -25).unwrap();
        assert_eq!(first.quality, MoveQuality::Good);
        assert_eq!(first.evaluation_after, 25);
        assert_eq!(first.move_notation, "e4");

        let fen = s.fen();
        let plan = s.on_best_move(&fen, Some("e7e5".into())).engine_move.unwrap();
        s.apply_engine_move(&plan).unwrap().unwrap();
        let fen = s.fen();
        s.on_evaluation(&fen, eval(12, 25));

        let second = human_move_with_insight(&mut s, "d1h5", 150).unwrap();
        assert_eq!(second.quality, MoveQuality::Blunder);
        assert_eq!(second.evaluation_after, -150);
        assert_eq!(s.tally().good, 1);
        assert_eq!(s.tally().blunder, 1);
        assert_eq!(s.insights().len(), 2);
    }

    #[test]
    fn matching_engine_best_move_is_best() {
        let mut s = started(Color::White);
        let fen = s.fen();
        s.on_evaluation(&fen, eval(12, 30));
        s.on_best_move(&fen, Some("d2d4".into()));
        let insight = human_move_with_insight(&mut s, "d2d4", 300).unwrap();
        assert_eq!(insight.quality, MoveQuality::Best);
    }

    #[test]
    fn shallow_updates_do_not_settle_analysis() {
        let mut s = started(Color::White);
        s.apply_human_move(&mv("e2e4")).unwrap();
        let fen = s.fen();
        assert!(s.on_evaluation(&fen, eval(4, -10)).is_none());
        assert_eq!(s.analysis(), AnalysisPhase::AwaitingEvaluation);
        let request = s.on_evaluation(&fen, eval(10, -10)).unwrap();
        assert_eq!(request.move_number, 1);
        assert_eq!(request.context.last_move, "e4");
        assert_eq!(request.context.time_remaining, Some(182));
        assert_eq!(request.context.pgn.as_deref(), Some("1. e4"));
        // Sem avaliação pré-lance → Good
        assert_eq!(request.context.quality, MoveQuality::Good);
    }

    #[test]
    fn stale_evaluations_are_ignored() {
        let mut s = started(Color::White);
        let old_fen = s.fen();
        s.apply_human_move(&mv("e2e4")).unwrap();
        assert!(s.on_evaluation(&old_fen, eval(20, 500)).is_none());
        assert!(s.snapshot().evaluation.is_none());
        let outcome = s.on_best_move(&old_fen, Some("d2d4".into()));
        assert!(outcome.engine_move.is_none() && outcome.commentary.is_none());
        assert_eq!(s.analysis(), AnalysisPhase::AwaitingEvaluation);
    }

    #[test]
    fn mentor_failure_records_no_insight_and_unblocks() {
        let mut s = started(Color::White);
        s.apply_human_move(&mv("e2e4")).unwrap();
        let fen = s.fen();
        let request = s.on_evaluation(&fen, eval(12, 0)).unwrap();
        assert!(s.on_commentary(request.move_number, Err(MentorError::Timeout)).is_none());
        assert!(s.insights().is_empty());
        assert_eq!(s.tally().total(), 0);
        assert_eq!(s.analysis(), AnalysisPhase::Idle);
        // Resposta atrasada do mesmo lance não gera insight duplicado
        assert!(s.on_commentary(request.move_number, commentary("tarde")).is_none());
    }

    #[test]
    fn mentor_disabled_or_degraded_skips_analysis() {
        let mut s = GameSession::new();
        s.start(SessionConfig { mentor_enabled: false, ..config(Color::White) }).unwrap();
        s.set_evaluator_ready(true);
        assert!(!s.apply_human_move(&mv("e2e4")).unwrap().analysis_started);

        let mut s = GameSession::new();
        s.start(config(Color::White)).unwrap();
        assert!(!s.apply_human_move(&mv("e2e4")).unwrap().analysis_started);
        let fen = s.fen();
        // Avaliador nunca pronto: nenhum lance automático
        assert!(s.on_best_move(&fen, Some("e7e5".into())).engine_move.is_none());
    }

    #[test]
    fn evaluator_loss_abandons_pending_analysis() {
        let mut s = started(Color::White);
        s.apply_human_move(&mv("e2e4")).unwrap();
        s.set_evaluator_ready(false);
        assert_eq!(s.analysis(), AnalysisPhase::Idle);
        assert!(!s.evaluator_ready());
    }

    #[test]
    fn evaluator_loss_keeps_a_move_already_classified() {
        let mut s = started(Color::White);
        s.apply_human_move(&mv("e2e4")).unwrap();
        let fen = s.fen();
        let request = s.on_evaluation(&fen, eval(12, -25)).unwrap();
        s.set_evaluator_ready(false);
        assert_eq!(s.analysis(), AnalysisPhase::AwaitingCommentary);
        let insight = s.on_commentary(request.move_number, commentary("ok")).unwrap();
        assert_eq!(insight.move_notation, "e4");
        assert_eq!(s.analysis(), AnalysisPhase::Idle);
    }

    #[test]
    fn engine_plays_exactly_once_per_position() {
        let mut s = started(Color::Black);
        let fen = s.fen();
        let plan = s.on_best_move(&fen, Some("e2e4".into())).engine_move.unwrap();
        assert!(s.on_best_move(&fen, Some("d2d4".into())).engine_move.is_none());
        assert!(s.apply_engine_move(&plan).unwrap().is_some());
        assert!(s.apply_engine_move(&plan).unwrap().is_none());
        assert_eq!(s.moves().len(), 1);
        assert_eq!(s.clock().white, 182);
    }

    #[test]
    fn checkmate_concludes_and_waits_for_analysis() {
        let mut s = started(Color::Black);
        for (engine, human) in [("f2f3", "e7e5"), ("g2g4", "d8h4")] {
            let fen = s.fen();
            let plan = s.on_best_move(&fen, Some(engine.into())).engine_move.unwrap();
            s.apply_engine_move(&plan).unwrap().unwrap();
            let applied = s.apply_human_move(&mv(human)).unwrap();
            if human == "d8h4" {
                assert_eq!(applied.game_over, Some((GameResult::BlackWins, Termination::Checkmate)));
            }
            let fen = s.fen();
            let depth = if human == "d8h4" { 0 } else { 12 };
            let snap = EvaluationSnapshot {
                depth,
                score: if depth == 0 { Score::Mate(0) } else { Score::Cp(-30) },
                pv: vec![],
                best_move: None,
                bound: false,
            };
            let request = match s.on_evaluation(&fen, snap) {
                Some(r) => r,
                None => s.on_best_move(&fen, None).commentary.unwrap(),
            };
            assert!(!s.ready_to_persist() || human != "d8h4");
            s.on_commentary(request.move_number, commentary("!")).unwrap();
        }
        assert_eq!(s.status(), Status::Concluding);
        assert_eq!(s.insights().last().unwrap().quality, MoveQuality::Best);
        assert!(s.ready_to_persist());
    }

    #[test]
    fn clock_flags_once_and_never_goes_negative() {
        let mut s = GameSession::new();
        s.start(SessionConfig { initial_time_secs: 2, time_control: "0".into(), ..config(Color::White) }).unwrap();
        assert_eq!(s.tick(), TickOutcome::Running);
        assert_eq!(s.tick(), TickOutcome::Flagged { color: Color::White, result: GameResult::BlackWins });
        assert_eq!(s.tick(), TickOutcome::Inactive);
        assert_eq!(s.clock().white, 0);
        assert_eq!(s.termination(), Some(Termination::TimeForfeit));
    }

    #[test]
    fn time_forfeit_against_lone_king_is_a_draw() {
        let mut s = GameSession::new();
        s.start(SessionConfig { initial_time_secs: 1, ..config(Color::White) }).unwrap();
        s.position = rules::parse_fen("4k3/8/8/8/8/8/8/RQ2K3 w - - 0 1").unwrap();
        assert_eq!(s.tick(), TickOutcome::Flagged { color: Color::White, result: GameResult::Draw });
    }

    #[test]
    fn resignation_result_depends_on_user_color() {
        let mut s = started(Color::White);
        assert_eq!(s.resign().unwrap(), GameResult::BlackWins);
        assert_eq!(s.status(), Status::Concluding);
        assert!(matches!(s.resign(), Err(SessionError::NotActive(Status::Concluding))));

        let mut s = started(Color::Black);
        assert_eq!(s.resign().unwrap().as_pgn(), "1-0");
    }

    #[test]
    fn persistence_lifecycle() {
        let mut s = started(Color::White);
        assert!(matches!(s.record(), Err(SessionError::NothingToPersist(Status::Active))));
        human_move_with_insight(&mut s, "e2e4", -20).unwrap();
        s.resign().unwrap();
        let record = s.record().unwrap();
        assert_eq!(record.result.as_pgn(), "0-1");
        assert_eq!(record.analysis_summary.good, 1);
        assert!(record.pgn.contains("1. e4 0-1"));
        assert!(record.pgn.contains("[TimeControl \"180+2\"]"));
        // Falha de gravação: continua Concluding com tudo em memória
        assert_eq!(s.status(), Status::Concluding);
        s.mark_persisted().unwrap();
        assert_eq!(s.status(), Status::Closed);
        assert_eq!(s.game_id(), None);
        assert_eq!(s.insights().len(), 1);
    }

    #[test]
    fn restore_replays_the_saved_game() {
        let mut s = started(Color::White);
        human_move_with_insight(&mut s, "e2e4", -20).unwrap();
        let fen = s.fen();
        let plan = s.on_best_move(&fen, Some("e7e5".into())).engine_move.unwrap();
        s.apply_engine_move(&plan).unwrap();
        s.resign().unwrap();
        let record = s.record().unwrap();

        let restored = GameSession::restore(&record).unwrap();
        assert_eq!(restored.fen(), s.fen());
        assert_eq!(restored.moves(), s.moves());
        assert_eq!(restored.tally(), s.tally());
        assert_eq!(restored.clock(), s.clock());
        assert_eq!(restored.increment_secs(), 2);
        assert_eq!(restored.status(), Status::Closed);

        let mut broken = record.clone();
        broken.final_fen = rules::to_fen(&Chess::default());
        assert!(GameSession::restore(&broken).is_err());
    }

    #[test]
    fn selection_hints_and_arrows() {
        let mut s = started(Color::White);
        assert_eq!(s.select_square(Square::G1), &[Square::F3, Square::H3]);
        assert!(s.select_square(Square::G1).is_empty());
        assert!(s.select_square(Square::E7).is_empty());
        assert!(s.toggle_arrow(Square::E2, Square::E4));
        assert!(!s.toggle_arrow(Square::E2, Square::E4));
        s.toggle_arrow(Square::D2, Square::D4);
        s.apply_human_move(&mv("e2e4")).unwrap();
        assert!(s.annotations().arrows.is_empty());
    }
}
