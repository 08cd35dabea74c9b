// src/engine.rs
// ---------------------------------------------------------------------------
// Cliente do avaliador de posições (protocolo UCI por linhas).
// ---------------------------------------------------------------------------
//  * Um único canal bidirecional de longa duração com o processo externo
//  * Uma task leitora converte linhas em eventos tipados (EngineEvent)
//  * Cada busca é marcada com o FEN que a originou; resultados de FEN antigo
//    continuam saindo marcados e quem consome decide descartar
// ---------------------------------------------------------------------------

use std::{collections::VecDeque, process::Stdio, sync::Arc};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::{timeout, Duration},
};

use crate::{
    config::{DEFAULT_DEPTH, DEPTH_TABLE, HASH_MB, MATE_CP, THREADS},
    error::EvaluatorError,
};

/// Score retornado pelo engine, sempre da perspectiva de quem joga na posição.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Score { Cp(i32), Mate(i32) }

impl Score {
    /// Converte em centipawns; mates viram ±MATE_CP ajustado pela distância.
    pub fn to_cp(self) -> i32 {
        match self {
            Score::Cp(cp)           => cp,
            Score::Mate(n) if n > 0 => MATE_CP.saturating_sub(n),
            Score::Mate(n)          => (-MATE_CP).saturating_sub(n),
        }
    }
}

/// Última avaliação conhecida de uma posição.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    pub depth:     u8,
    pub score:     Score,
    pub pv:        Vec<String>,      // Variação principal em UCI
    pub best_move: Option<String>,   // Preenchido pela linha "bestmove"
    #[serde(default)]
    pub bound:     bool,             // lowerbound/upperbound: score inexato
}

impl EvaluationSnapshot {
    pub fn centipawns(&self) -> i32 {
        self.score.to_cp()
    }

    pub fn mate_distance(&self) -> Option<i32> {
        match self.score {
            Score::Mate(n) => Some(n),
            Score::Cp(_)   => None,
        }
    }

    pub fn pv_first_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }

    /// Lance sugerido: o `bestmove` final ou, na falta dele, o início da PV.
    pub fn suggested_move(&self) -> Option<&str> {
        self.best_move.as_deref().or_else(|| self.pv_first_move())
    }
}

/// Eventos publicados pela task leitora.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Ready,
    Evaluation { fen: String, snapshot: EvaluationSnapshot },
    BestMove { fen: String, best_move: Option<String> },
    Unavailable,
}

pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness { Starting, Ready, Unavailable }

/// Profundidade direta ou nível de dificuldade (mapeado pela tabela).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDepth { Depth(u8), Level(u8) }

impl SearchDepth {
    pub fn plies(self) -> u8 {
        match self {
            SearchDepth::Depth(d) => d.max(1),
            SearchDepth::Level(l) => depth_for_level(l),
        }
    }
}

pub fn depth_for_level(level: u8) -> u8 {
    DEPTH_TABLE
        .iter()
        .find(|(l, _)| *l == level)
        .map(|(_, d)| *d)
        .unwrap_or(DEFAULT_DEPTH)
}

/// Buscas em andamento (FIFO: cada `go` termina com exatamente um `bestmove`).
#[derive(Debug, Default)]
struct SearchLog {
    pending:          VecDeque<String>,
    last_submitted:   Option<String>,
    latest:           Option<EvaluationSnapshot>,
    latest_best_move: Option<String>,
}

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Cliente do avaliador.
pub struct Evaluator {
    child:  Option<Child>,
    stdin:  Option<SharedWriter>,
    log:    Arc<Mutex<SearchLog>>,
    ready:  Arc<watch::Sender<Readiness>>,
    reader: Option<JoinHandle<()>>,
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() { let _ = child.start_kill(); }
        if let Some(reader) = self.reader.take() { reader.abort(); }
    }
}

impl Evaluator {
    /// Sobe o processo do engine. Nunca falha: se o processo não sobe, o cliente
    /// fica permanentemente indisponível (modo degradado).
    pub async fn spawn(path: &str) -> (Self, EngineEvents) {
        let spawned = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("não foi possível iniciar o avaliador '{path}': {e}");
                return Self::unavailable();
            }
        };
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            warn!("avaliador '{path}' sem stdin/stdout");
            return Self::unavailable();
        };
        let (mut evaluator, events) = Self::from_io(stdout, stdin).await;
        evaluator.child = Some(child);
        (evaluator, events)
    }

    /// Conecta a qualquer par leitor/escritor que fale UCI (processo, socket, teste).
    pub async fn from_io<R, W>(reader: R, writer: W) -> (Self, EngineEvents)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, _) = watch::channel(Readiness::Starting);
        let ready = Arc::new(ready_tx);
        let log = Arc::new(Mutex::new(SearchLog::default()));
        let stdin: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));

        let reader = tokio::spawn(read_loop(reader, log.clone(), ready.clone(), tx));
        let evaluator = Self { child: None, stdin: Some(stdin), log, ready, reader: Some(reader) };

        // Handshake: a prontidão chega pela task leitora (uciok/readyok)
        let handshake = [
            "uci".to_string(),
            format!("setoption name Threads value {THREADS}"),
            format!("setoption name Hash value {HASH_MB}"),
            "isready".to_string(),
        ];
        for line in &handshake {
            if let Err(e) = evaluator.cmd(line).await {
                warn!("handshake com o avaliador falhou: {e}");
                evaluator.ready.send_replace(Readiness::Unavailable);
                break;
            }
        }
        (evaluator, rx)
    }

    /// Cliente sem processo: nunca fica pronto.
    pub fn unavailable() -> (Self, EngineEvents) {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, _) = watch::channel(Readiness::Unavailable);
        let evaluator = Self {
            child: None,
            stdin: None,
            log: Arc::new(Mutex::new(SearchLog::default())),
            ready: Arc::new(ready_tx),
            reader: None,
        };
        (evaluator, rx)
    }

    pub fn readiness(&self) -> Readiness {
        *self.ready.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Espera a prontidão até `limit`; devolve `true` se ficou pronto.
    pub async fn wait_ready(&self, limit: Duration) -> bool {
        let mut rx = self.ready.subscribe();
        let settled = timeout(limit, rx.wait_for(|r| *r != Readiness::Starting)).await;
        matches!(settled, Ok(Ok(r)) if *r == Readiness::Ready)
    }

    /// Envia comando UCI
    #[inline]
    async fn cmd(&self, c: &str) -> Result<(), EvaluatorError> {
        let Some(stdin) = &self.stdin else { return Err(EvaluatorError::NotReady) };
        let mut w = stdin.lock().await;
        w.write_all(c.as_bytes()).await?;
        w.write_all(b"\n").await?;
        w.flush().await?;
        Ok(())
    }

    /// Submete uma posição. Antes da prontidão a chamada é descartada (não enfileirada).
    /// Uma busca ainda em andamento recebe `stop`; seu resultado sai marcado com o FEN antigo.
    pub async fn evaluate(&self, fen: &str, depth: SearchDepth) -> Result<(), EvaluatorError> {
        if !self.is_ready() {
            debug!("avaliação descartada (avaliador não pronto): {fen}");
            return Err(EvaluatorError::NotReady);
        }
        let busy = {
            let mut log = self.log.lock().await;
            let busy = !log.pending.is_empty();
            log.pending.push_back(fen.to_string());
            log.last_submitted = Some(fen.to_string());
            log.latest = None;
            log.latest_best_move = None;
            busy
        };
        let sent = async {
            if busy { self.cmd("stop").await?; }
            self.cmd(&format!("position fen {fen}")).await?;
            self.cmd(&format!("go depth {}", depth.plies())).await
        }
        .await;
        if let Err(e) = sent {
            warn!("avaliador perdido ao submeter posição: {e}");
            self.ready.send_replace(Readiness::Unavailable);
            return Err(e);
        }
        trace!("busca submetida (depth {}): {fen}", depth.plies());
        Ok(())
    }

    /// Avaliação mais recente da última posição submetida.
    pub async fn latest_evaluation(&self) -> Option<EvaluationSnapshot> {
        self.log.lock().await.latest.clone()
    }

    /// `bestmove` da última posição submetida, se a busca já terminou.
    pub async fn latest_best_move(&self) -> Option<String> {
        self.log.lock().await.latest_best_move.clone()
    }
}

/// Task leitora: uma linha por vez, até o fim do canal.
async fn read_loop<R>(
    reader: R,
    log:    Arc<Mutex<SearchLog>>,
    ready:  Arc<watch::Sender<Readiness>>,
    events: mpsc::UnboundedSender<EngineEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(line.trim(), &log, &ready, &events).await,
            Ok(None) => { warn!("avaliador encerrou o canal"); break; }
            Err(e)   => { warn!("erro lendo do avaliador: {e}"); break; }
        }
    }
    ready.send_replace(Readiness::Unavailable);
    let _ = events.send(EngineEvent::Unavailable);
}

async fn handle_line(
    line:   &str,
    log:    &Mutex<SearchLog>,
    ready:  &watch::Sender<Readiness>,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    if line == "uciok" || line == "readyok" {
        let starting = *ready.borrow() == Readiness::Starting;
        if starting {
            info!("avaliador pronto");
            ready.send_replace(Readiness::Ready);
            let _ = events.send(EngineEvent::Ready);
        }
    } else if line.starts_with("info ") {
        let Some(mut snapshot) = parse_info_line(line) else { return };
        let fen = {
            let mut log = log.lock().await;
            let Some(fen) = log.pending.front().cloned() else { return };
            if log.last_submitted.as_deref() == Some(fen.as_str()) {
                // Linha sem PV herda a PV anterior da mesma busca
                if snapshot.pv.is_empty() {
                    if let Some(prev) = &log.latest { snapshot.pv = prev.pv.clone(); }
                }
                log.latest = Some(snapshot.clone());
            }
            fen
        };
        let _ = events.send(EngineEvent::Evaluation { fen, snapshot });
    } else if line.starts_with("bestmove") {
        let best_move = line
            .split_whitespace()
            .nth(1)
            .filter(|m| *m != "(none)" && *m != "0000")
            .map(str::to_string);
        let fen = {
            let mut log = log.lock().await;
            let Some(fen) = log.pending.pop_front() else { return };
            if log.last_submitted.as_deref() == Some(fen.as_str()) {
                log.latest_best_move = best_move.clone();
                if let Some(latest) = log.latest.as_mut() { latest.best_move = best_move.clone(); }
            }
            fen
        };
        let _ = events.send(EngineEvent::BestMove { fen, best_move });
    } else {
        trace!("avaliador: {line}");
    }
}

/// Parser UCI "info depth <d> score cp|mate <n> [lowerbound|upperbound] ... pv <lances>"
/// Centipawns ficam limitados a ±MATE_CP.
pub fn parse_info_line(line: &str) -> Option<EvaluationSnapshot> {
    let mut parts = line.split_whitespace();
    let mut depth = None;
    let mut score = None;
    let mut bound = false;
    let mut pv = Vec::new();
    while let Some(tok) = parts.next() {
        match tok {
            "depth" => depth = parts.next().and_then(|s| s.parse().ok()),
            "score" => if let Some(kind) = parts.next() {
                let value: Option<i32> = parts.next().and_then(|s| s.parse().ok());
                score = match (kind, value) {
                    ("cp", Some(v))   => Some(Score::Cp(v.clamp(-MATE_CP, MATE_CP))),
                    ("mate", Some(v)) => Some(Score::Mate(v)),
                    _                 => None,
                };
            },
            "lowerbound" | "upperbound" => bound = true,
            "pv" => { pv = parts.by_ref().map(str::to_string).collect(); break; }
            _    => {},
        }
    }
    Some(EvaluationSnapshot { depth: depth?, score: score?, pv, best_move: None, bound })
}
