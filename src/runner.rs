// src/runner.rs
// ---------------------------------------------------------------------------
// Ator da sessão: uma task dona do `GameSession` que serializa comandos da
// interface, eventos do avaliador, respostas do mentor, o relógio e o lance
// atrasado do engine. A interface fala com ele por `SessionHandle`.
// ---------------------------------------------------------------------------

use std::{sync::Arc, time::Duration};

use futures_util::future::OptionFuture;
use log::{debug, info, trace, warn};
use rand::Rng;
use shakmaty::Square;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::{interval_at, sleep_until, timeout, Instant, Interval, MissedTickBehavior},
};

use crate::{
    clock::Clock,
    config::{ENGINE_DELAY_MAX_MS, ENGINE_DELAY_MIN_MS, MENTOR_TIMEOUT, TICK_INTERVAL},
    engine::{EngineEvent, EngineEvents, EvaluationSnapshot, Evaluator},
    error::{MentorError, SessionError},
    mentor::{Commentary, MentorRequester},
    rules::{GameResult, MoveRecord, MoveRequest},
    session::{
        CommentaryRequest, EngineMovePlan, GameSession, Insight, MoveApplied, SessionConfig,
        SessionSnapshot, Status, Termination, TickOutcome,
    },
    store::PersistenceGateway,
};

/// Eventos publicados para a interface.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    EvaluatorReady,
    EvaluatorUnavailable,
    MoveApplied { record: MoveRecord, by_engine: bool },
    EvaluationUpdated { fen: String, snapshot: EvaluationSnapshot },
    EngineMoveScheduled { delay: Duration },
    AnalysisStarted { move_number: u32 },
    CommentaryRequested { move_number: u32 },
    Insight(Insight),
    AnalysisSkipped { move_number: u32 },
    ClockTick(Clock),
    GameOver { result: GameResult, termination: Termination },
    Persisted { game_id: String },
    PersistenceFailed { message: String },
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub engine_delay_min: Duration,
    pub engine_delay_max: Duration,
    pub mentor_timeout:   Duration,
    pub tick:             Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            engine_delay_min: Duration::from_millis(ENGINE_DELAY_MIN_MS),
            engine_delay_max: Duration::from_millis(ENGINE_DELAY_MAX_MS),
            mentor_timeout:   MENTOR_TIMEOUT,
            tick:             TICK_INTERVAL,
        }
    }
}

impl RunnerOptions {
    /// Atraso uniforme na janela configurada.
    fn engine_delay(&self) -> Duration {
        if self.engine_delay_max <= self.engine_delay_min {
            return self.engine_delay_min;
        }
        rand::thread_rng().gen_range(self.engine_delay_min..=self.engine_delay_max)
    }
}

enum Command {
    Play { request: MoveRequest, reply: oneshot::Sender<Result<MoveRecord, SessionError>> },
    Resign { reply: oneshot::Sender<Result<GameResult, SessionError>> },
    Select { square: Square, reply: oneshot::Sender<Vec<Square>> },
    ToggleArrow { from: Square, to: Square, reply: oneshot::Sender<bool> },
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
    RetrySave { reply: oneshot::Sender<Result<(), SessionError>> },
    Shutdown,
}

/// Ponta da interface. Barata de clonar; a sessão some quando todas caem.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events:   broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).await.map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    pub async fn play(&self, request: MoveRequest) -> Result<MoveRecord, SessionError> {
        self.request(|reply| Command::Play { request, reply }).await?
    }

    pub async fn resign(&self) -> Result<GameResult, SessionError> {
        self.request(|reply| Command::Resign { reply }).await?
    }

    /// Seleciona uma casa e devolve os destinos legais (vazio = seleção limpa).
    pub async fn select(&self, square: Square) -> Result<Vec<Square>, SessionError> {
        self.request(|reply| Command::Select { square, reply }).await
    }

    pub async fn toggle_arrow(&self, from: Square, to: Square) -> Result<bool, SessionError> {
        self.request(|reply| Command::ToggleArrow { from, to, reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Nova tentativa de gravação depois de uma falha; a sessão segue em `Concluding` até dar certo.
    pub async fn retry_save(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::RetrySave { reply }).await?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Inicia a sessão e sobe o ator. Sem mentor, a sessão roda sem comentários.
pub fn spawn_session(
    mut config: SessionConfig,
    evaluator: Evaluator,
    engine_events: EngineEvents,
    mentor: Option<MentorRequester>,
    store: Arc<dyn PersistenceGateway>,
    options: RunnerOptions,
) -> Result<(SessionHandle, broadcast::Receiver<SessionEvent>, JoinHandle<()>), SessionError> {
    if config.mentor_enabled && mentor.is_none() {
        warn!("mentor pedido mas não configurado; partida segue sem comentários");
        config.mentor_enabled = false;
    }
    let mut session = GameSession::new();
    session.set_evaluator_ready(evaluator.is_ready());
    session.start(config)?;

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = broadcast::channel(256);
    let (commentary_tx, commentary_rx) = mpsc::unbounded_channel();

    let actor = SessionActor {
        session,
        evaluator,
        engine_events,
        engine_open: true,
        mentor: mentor.map(Arc::new),
        store,
        options,
        events: event_tx.clone(),
        commentary_tx,
        commentary_rx,
        engine_move: None,
        conclude_by: None,
        save_attempted: false,
    };
    let task = tokio::spawn(actor.run(cmd_rx));
    Ok((SessionHandle { commands: cmd_tx, events: event_tx }, event_rx, task))
}

type CommentaryResult = (u32, Result<Commentary, MentorError>);

struct SessionActor {
    session:        GameSession,
    evaluator:      Evaluator,
    engine_events:  EngineEvents,
    engine_open:    bool,
    mentor:         Option<Arc<MentorRequester>>,
    store:          Arc<dyn PersistenceGateway>,
    options:        RunnerOptions,
    events:         broadcast::Sender<SessionEvent>,
    commentary_tx:  mpsc::UnboundedSender<CommentaryResult>,
    commentary_rx:  mpsc::UnboundedReceiver<CommentaryResult>,
    engine_move:    Option<(Instant, EngineMovePlan)>,
    conclude_by:    Option<Instant>,   // Prazo para a análise pendente antes de gravar
    save_attempted: bool,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = interval_at(Instant::now() + self.options.tick, self.options.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.session.evaluator_ready() {
            self.submit_current().await;
        }

        loop {
            let engine_due: OptionFuture<_> = self.engine_move.as_ref().map(|(at, _)| sleep_until(*at)).into();
            let conclude_due: OptionFuture<_> = self.conclude_by.map(sleep_until).into();

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd, &mut ticker).await,
                },
                event = self.engine_events.recv(), if self.engine_open => match event {
                    Some(event) => self.on_engine_event(event).await,
                    None => {
                        self.engine_open = false;
                        if self.session.evaluator_ready() { self.evaluator_lost().await; }
                    }
                },
                Some((move_number, result)) = self.commentary_rx.recv() => {
                    self.on_commentary(move_number, result).await;
                },
                _ = ticker.tick() => self.on_tick().await,
                Some(()) = engine_due => self.play_engine_move(&mut ticker).await,
                Some(()) = conclude_due => {
                    warn!("análise do último lance não terminou a tempo; gravando sem ela");
                    self.conclude_by = None;
                    self.session.abandon_analysis();
                    self.maybe_persist().await;
                },
            }
        }
        info!("sessão encerrada ({:?})", self.session.status());
    }

    fn emit(&self, event: SessionEvent) {
        // Sem ouvintes não é erro
        let _ = self.events.send(event);
    }

    async fn on_command(&mut self, cmd: Command, ticker: &mut Interval) {
        match cmd {
            Command::Play { request, reply } => {
                let result = match self.session.apply_human_move(&request) {
                    Ok(applied) => {
                        self.after_move(&applied, false, ticker).await;
                        Ok(applied.record)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Resign { reply } => {
                let result = self.session.resign();
                if let Ok(r) = result {
                    self.begin_conclusion(r, Termination::Resignation).await;
                }
                let _ = reply.send(result);
            }
            Command::Select { square, reply } => {
                let _ = reply.send(self.session.select_square(square).to_vec());
            }
            Command::ToggleArrow { from, to, reply } => {
                let _ = reply.send(self.session.toggle_arrow(from, to));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::RetrySave { reply } => {
                let _ = reply.send(self.retry_save().await);
            }
            Command::Shutdown => {}
        }
    }

    /// Efeitos comuns a qualquer lance aplicado.
    async fn after_move(&mut self, applied: &MoveApplied, by_engine: bool, ticker: &mut Interval) {
        ticker.reset();
        self.engine_move = None;
        self.emit(SessionEvent::MoveApplied { record: applied.record.clone(), by_engine });
        if applied.analysis_started {
            self.emit(SessionEvent::AnalysisStarted { move_number: applied.record.move_number });
        }
        // Posição final só é avaliada se ainda há análise a fechar
        if applied.game_over.is_none() || applied.analysis_started {
            self.submit_current().await;
        }
        if let Some((result, termination)) = applied.game_over {
            self.begin_conclusion(result, termination).await;
        }
    }

    async fn submit_current(&mut self) {
        if !self.session.evaluator_ready() {
            return;
        }
        let fen = self.session.fen();
        if let Err(e) = self.evaluator.evaluate(&fen, self.session.search_depth()).await {
            warn!("avaliação não submetida: {e}");
            self.evaluator_lost().await;
        }
    }

    async fn evaluator_lost(&mut self) {
        self.session.set_evaluator_ready(false);
        self.engine_move = None;
        self.emit(SessionEvent::EvaluatorUnavailable);
        self.maybe_persist().await;
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Ready => {
                if !self.session.evaluator_ready() {
                    self.session.set_evaluator_ready(true);
                    self.emit(SessionEvent::EvaluatorReady);
                    if self.session.status() == Status::Active {
                        self.submit_current().await;
                    }
                }
            }
            EngineEvent::Evaluation { fen, snapshot } => {
                if fen == self.session.fen() {
                    self.emit(SessionEvent::EvaluationUpdated { fen: fen.clone(), snapshot: snapshot.clone() });
                }
                if let Some(request) = self.session.on_evaluation(&fen, snapshot) {
                    self.request_commentary(request);
                }
            }
            EngineEvent::BestMove { fen, best_move } => {
                let outcome = self.session.on_best_move(&fen, best_move);
                if let Some(request) = outcome.commentary {
                    self.request_commentary(request);
                }
                if let Some(plan) = outcome.engine_move {
                    let delay = self.options.engine_delay();
                    debug!("engine joga {} em {} ms", plan.uci, delay.as_millis());
                    self.engine_move = Some((Instant::now() + delay, plan));
                    self.emit(SessionEvent::EngineMoveScheduled { delay });
                }
                self.maybe_persist().await;
            }
            EngineEvent::Unavailable => {
                if self.session.evaluator_ready() {
                    self.evaluator_lost().await;
                }
            }
        }
    }

    /// Chamada ao mentor fora do ator; o resultado volta pelo canal de comentários.
    fn request_commentary(&self, request: CommentaryRequest) {
        let CommentaryRequest { move_number, context } = request;
        self.emit(SessionEvent::CommentaryRequested { move_number });
        let tx = self.commentary_tx.clone();
        let Some(mentor) = self.mentor.clone() else {
            let _ = tx.send((move_number, Err(MentorError::MissingApiKey)));
            return;
        };
        let limit = self.options.mentor_timeout;
        tokio::spawn(async move {
            let result = match timeout(limit, mentor.request(&context)).await {
                Ok(result) => result,
                Err(_) => Err(MentorError::Timeout),
            };
            let _ = tx.send((move_number, result));
        });
    }

    async fn on_commentary(&mut self, move_number: u32, result: Result<Commentary, MentorError>) {
        match self.session.on_commentary(move_number, result) {
            Some(insight) => self.emit(SessionEvent::Insight(insight)),
            None => self.emit(SessionEvent::AnalysisSkipped { move_number }),
        }
        self.maybe_persist().await;
    }

    async fn on_tick(&mut self) {
        match self.session.tick() {
            TickOutcome::Inactive => {}
            TickOutcome::Running => self.emit(SessionEvent::ClockTick(self.session.clock())),
            TickOutcome::Flagged { result, .. } => {
                self.emit(SessionEvent::ClockTick(self.session.clock()));
                self.begin_conclusion(result, Termination::TimeForfeit).await;
            }
        }
    }

    async fn play_engine_move(&mut self, ticker: &mut Interval) {
        let Some((_, plan)) = self.engine_move.take() else { return };
        match self.session.apply_engine_move(&plan) {
            Ok(Some(applied)) => self.after_move(&applied, true, ticker).await,
            Ok(None) => trace!("lance do engine {} descartado (posição mudou)", plan.uci),
            Err(e) => warn!("lance do engine {} recusado: {e}", plan.uci),
        }
    }

    async fn begin_conclusion(&mut self, result: GameResult, termination: Termination) {
        self.engine_move = None;
        self.emit(SessionEvent::GameOver { result, termination });
        if !self.session.ready_to_persist() {
            debug!("aguardando análise do último lance antes de gravar");
            self.conclude_by = Some(Instant::now() + self.options.mentor_timeout);
        }
        self.maybe_persist().await;
    }

    /// Grava uma única vez, assim que não há análise pendente. Novas tentativas só via `retry_save`.
    async fn maybe_persist(&mut self) {
        if self.save_attempted || !self.session.ready_to_persist() {
            return;
        }
        self.save_attempted = true;
        self.conclude_by = None;
        let _ = self.persist().await;
    }

    async fn retry_save(&mut self) -> Result<(), SessionError> {
        let status = self.session.status();
        if status != Status::Concluding {
            return Err(SessionError::NothingToPersist(status));
        }
        if !self.session.ready_to_persist() {
            self.session.abandon_analysis();
        }
        self.save_attempted = true;
        self.conclude_by = None;
        self.persist().await
    }

    async fn persist(&mut self) -> Result<(), SessionError> {
        let record = self.session.record()?;
        match self.store.save(&record).await {
            Ok(()) => {
                self.session.mark_persisted()?;
                self.emit(SessionEvent::Persisted { game_id: record.game_id });
                Ok(())
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!("falha ao gravar a partida {}: {message}", record.game_id);
                self.emit(SessionEvent::PersistenceFailed { message: message.clone() });
                Err(SessionError::Persistence(message))
            }
        }
    }
}
