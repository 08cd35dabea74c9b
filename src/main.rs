// src/main.rs
// ---------------------------------------------------------------------------
// CLI de terminal: joga contra o Stockfish com o mentor comentando os lances.
// ---------------------------------------------------------------------------

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{info, warn};
use rand::Rng;
use shakmaty::{Color, Square};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::{broadcast, Notify},
    time::timeout,
};
use uuid::Uuid;

use chess_mentor::{
    clock::TimeControl,
    config,
    engine::Evaluator,
    lab::{collect_errors, Attempt, LabExercise, LabRequest},
    mentor::{MentorRequester, OpenAiMentor},
    rules::{self, parse_color, MoveRequest},
    runner::{spawn_session, RunnerOptions, SessionEvent, SessionHandle},
    session::{Annotations, GameSession, SessionConfig, Status},
    settings::MentorSettings,
    store::{JsonFileStore, PersistenceGateway},
    utils::detect_stockfish_path,
    visual,
};

/// Args CLI - Argumentos da linha de comando para configuração
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, default_value = "white")]
    pub color: String,                                        // white | black | auto
    #[arg(short, long, default_value = config::DEFAULT_TIME_CONTROL)]
    pub time_control: String,                                 // "3|2", "10", ...
    #[arg(long)]
    pub initial_secs: Option<u32>,                            // Sobrepõe o tempo do rótulo
    #[arg(short, long, default_value_t = config::DEFAULT_LEVEL)]
    pub level: u8,                                            // Dificuldade 1..4
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub mentor: bool,                                         // Comentários do mentor
    #[arg(long)]
    pub engine: Option<String>,                               // Caminho do Stockfish
    #[arg(long, default_value = config::SETTINGS_FILE)]
    pub settings: PathBuf,                                    // Configurações do mentor
    #[arg(long, default_value = config::DEFAULT_GAMES_DIR)]
    pub games_dir: PathBuf,                                   // Partidas gravadas
    #[arg(long, default_value_t = config::ENGINE_DELAY_MIN_MS)]
    pub engine_delay_min_ms: u64,
    #[arg(long, default_value_t = config::ENGINE_DELAY_MAX_MS)]
    pub engine_delay_max_ms: u64,
    #[arg(long)]
    pub review: Option<String>,                               // Revisa uma partida gravada
    #[arg(long)]
    pub lab: bool,                                            // Refaz os erros das partidas gravadas
    #[arg(long, default_value = "info")]
    pub log_level: String,                                    // Nível de logging
}

/// Configura o logger com o nível especificado
fn setup_logger(level: &str) {
    env_logger::Builder::new().filter_level(level.parse().unwrap_or(log::LevelFilter::Info)).init();
}

fn resolve_color(label: &str) -> Result<Color> {
    if label.trim().eq_ignore_ascii_case("auto") {
        return Ok(if rand::thread_rng().gen_bool(0.5) { Color::White } else { Color::Black });
    }
    parse_color(label).with_context(|| format!("cor inválida: {label} (use white, black ou auto)"))
}

/// Ponto de entrada principal do programa
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logger(&args.log_level);
    let store = Arc::new(JsonFileStore::new(&args.games_dir));

    if let Some(game_id) = &args.review {
        return review(store.as_ref(), game_id).await;
    }

    // Mentor
    let settings = MentorSettings::load(&args.settings)?;
    let mentor = if args.mentor {
        match OpenAiMentor::from_settings(&settings) {
            Ok(service) => Some(MentorRequester::new(Arc::new(service), settings.model.clone())),
            Err(e) => { warn!("mentor desligado: {e}"); None }
        }
    } else {
        None
    };

    if args.lab {
        return lab(store.as_ref(), mentor.as_ref()).await;
    }

    // Configuração da partida
    let color = resolve_color(&args.color)?;
    let time_control = TimeControl::parse(&args.time_control);
    if time_control.is_none() {
        warn!("controle de tempo '{}' inválido; sem incremento", args.time_control);
    }
    let initial_time_secs = args
        .initial_secs
        .or(time_control.map(|tc| tc.initial_secs))
        .unwrap_or(config::DEFAULT_INITIAL_SECS);

    // Avaliador (modo degradado se não existir)
    let engine_path = args.engine.clone().or_else(|| detect_stockfish_path().ok());
    let (evaluator, engine_events) = match &engine_path {
        Some(path) => Evaluator::spawn(path).await,
        None => { warn!("Stockfish não encontrado"); Evaluator::unavailable() }
    };
    let ready = evaluator.wait_ready(config::ENGINE_READY_TIMEOUT).await;

    let session_config = SessionConfig {
        game_id: Uuid::new_v4().to_string(),
        color,
        initial_time_secs,
        time_control: args.time_control.clone(),
        mentor_enabled: mentor.is_some(),
        difficulty: args.level,
    };
    visual::print_main_header();
    visual::print_stockfish_info(engine_path.as_deref().unwrap_or("-"), ready);
    visual::print_configurations(&session_config, TimeControl::increment_of(&args.time_control));
    visual::print_help();

    let options = RunnerOptions {
        engine_delay_min: std::time::Duration::from_millis(args.engine_delay_min_ms),
        engine_delay_max: std::time::Duration::from_millis(args.engine_delay_max_ms.max(args.engine_delay_min_ms)),
        ..Default::default()
    };
    let (handle, events, task) = spawn_session(session_config, evaluator, engine_events, mentor, store, options)?;

    let finished = Arc::new(Notify::new());
    let printer = tokio::spawn(print_events(events, handle.clone(), finished.clone()));
    redraw(&handle).await;

    // Loop de comandos
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("ler stdin")?,
            _ = finished.notified() => break,
        };
        let Some(line) = line else { break };
        if !handle_input(&handle, line.trim()).await { break; }
    }

    if let Ok(snap) = handle.snapshot().await {
        if snap.status == Status::Concluding {
            visual::print_error("Partida não foi gravada; use 'save' antes de sair da próxima vez.");
        }
    }
    handle.shutdown().await;
    let _ = task.await;
    printer.abort();
    Ok(())
}

/// Executa um comando digitado; `false` encerra o programa.
async fn handle_input(handle: &SessionHandle, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        None => {}
        Some("quit" | "exit") => return false,
        Some("help") => visual::print_help(),
        Some("board") => redraw(handle).await,
        Some("resign") => match handle.resign().await {
            Ok(result) => info!("desistência registrada: {result}"),
            Err(e) => visual::print_error(&e.to_string()),
        },
        Some("save") => match handle.retry_save().await {
            Ok(()) => visual::print_success("Partida gravada."),
            Err(e) => visual::print_error(&e.to_string()),
        },
        Some("hint") => match parts.next().and_then(|s| s.parse::<Square>().ok()) {
            Some(square) => match handle.select(square).await {
                Ok(hints) if hints.is_empty() => visual::console_yellow("Nenhum destino (seleção limpa)."),
                Ok(_) => redraw(handle).await,
                Err(e) => visual::print_error(&e.to_string()),
            },
            None => visual::print_error("uso: hint <casa>"),
        },
        Some("arrow") => {
            let from = parts.next().and_then(|s| s.parse::<Square>().ok());
            let to = parts.next().and_then(|s| s.parse::<Square>().ok());
            match (from, to) {
                (Some(from), Some(to)) => {
                    if handle.toggle_arrow(from, to).await.is_ok() { redraw(handle).await; }
                }
                _ => visual::print_error("uso: arrow <de> <para>"),
            }
        }
        Some(mv) => match mv.parse::<MoveRequest>() {
            Ok(request) => {
                if let Err(e) = handle.play(request).await {
                    visual::print_error(&e.to_string());
                }
            }
            Err(e) => visual::print_error(&e.to_string()),
        },
    }
    true
}

async fn redraw(handle: &SessionHandle) {
    let Ok(snap) = handle.snapshot().await else { return };
    match rules::parse_fen(&snap.fen) {
        Ok(position) => {
            visual::render_board(&position, snap.user_color, &snap.annotations, snap.last_move.as_ref());
            visual::print_clock(&snap.clock, snap.turn);
        }
        Err(e) => warn!("FEN inválido na sessão: {e}"),
    }
}

/// Mostra os eventos da sessão; avisa `finished` quando a partida foi gravada.
async fn print_events(mut events: broadcast::Receiver<SessionEvent>, handle: SessionHandle, finished: Arc<Notify>) {
    // Spinner do lance aguardando comentário
    let mut spinner: Option<(u32, visual::MentorSpinner)> = None;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => { warn!("{n} eventos perdidos"); continue; }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            SessionEvent::MoveApplied { record, by_engine } => {
                visual::print_move(&record, by_engine);
                redraw(&handle).await;
            }
            SessionEvent::CommentaryRequested { move_number } => {
                if let Some((_, old)) = spinner.take() { old.finish(); }
                spinner = Some((move_number, visual::MentorSpinner::start("Aristóteles está pensando...")));
            }
            SessionEvent::Insight(insight) => {
                finish_spinner(&mut spinner, insight.move_number);
                visual::print_insight(&insight);
            }
            SessionEvent::AnalysisSkipped { move_number } => finish_spinner(&mut spinner, move_number),
            SessionEvent::EvaluatorUnavailable => visual::print_error("Avaliador indisponível: partida segue sem análise."),
            SessionEvent::GameOver { result, termination } => visual::print_game_over(result, termination),
            SessionEvent::Persisted { game_id } => {
                if let Ok(snap) = handle.snapshot().await {
                    visual::print_success(&format!("Partida gravada ({game_id})."));
                    visual::render_summary(&snap.tally);
                }
                finished.notify_one();
            }
            SessionEvent::PersistenceFailed { message } => {
                visual::print_error(&format!("Falha ao gravar: {message}. Use 'save' para tentar de novo."));
            }
            _ => {}
        }
    }
}

fn finish_spinner(spinner: &mut Option<(u32, visual::MentorSpinner)>, move_number: u32) {
    if spinner.as_ref().is_some_and(|(n, _)| *n == move_number) {
        if let Some((_, s)) = spinner.take() { s.finish(); }
    }
}

/// Revisão de uma partida gravada
async fn review(store: &dyn PersistenceGateway, game_id: &str) -> Result<()> {
    let record = store.load(game_id).await?;
    let session = GameSession::restore(&record)?;
    visual::print_main_header();
    println!("{}\n", record.pgn);
    visual::render_board(session.position(), session.user_color(), session.annotations(), session.moves().last());
    for insight in session.insights() {
        visual::print_insight(insight);
    }
    if let Some(termination) = session.termination() {
        visual::print_game_over(session.result(), termination);
    }
    visual::render_summary(&session.tally());
    Ok(())
}

/// Laboratório: percorre os erros das partidas recentes, do mais novo ao mais antigo.
async fn lab(store: &dyn PersistenceGateway, mentor: Option<&MentorRequester>) -> Result<()> {
    let records = store.recent(config::LAB_GAME_LIMIT).await?;
    let exercises = collect_errors(&records);
    visual::print_main_header();
    if exercises.is_empty() {
        visual::print_success("Perfeição! Nenhum erro nas partidas gravadas.");
        return Ok(());
    }
    info!("{} erros em {} partidas", exercises.len(), records.len());
    visual::print_lab_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    for (index, exercise) in exercises.iter().enumerate() {
        visual::print_lab_exercise(index, exercises.len(), exercise);
        show_exercise(exercise);
        if !lab_exercise(exercise, mentor, &mut lines).await? { break; }
    }
    visual::console_yellow("Fim do laboratório.");
    Ok(())
}

fn show_exercise(exercise: &LabExercise) {
    match exercise.position() {
        Ok(position) => visual::render_board(&position, exercise.player_color, &Annotations::default(), None),
        Err(e) => warn!("{e:#}"),
    }
}

/// Comandos de um exercício; `false` encerra o laboratório.
async fn lab_exercise(
    exercise: &LabExercise,
    mentor: Option<&MentorRequester>,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<bool> {
    while let Some(line) = lines.next_line().await.context("ler stdin")? {
        match line.trim() {
            "" => {}
            "quit" | "exit" => return Ok(false),
            "next" => return Ok(true),
            "help" => visual::print_lab_help(),
            "board" => show_exercise(exercise),
            "hint" => ask_mentor(exercise, mentor, LabRequest::Hint).await,
            "solution" => ask_mentor(exercise, mentor, LabRequest::Solution).await,
            mv => match mv.parse::<MoveRequest>() {
                Ok(request) => match exercise.attempt(&request) {
                    Ok(Attempt::Repeated) => visual::console_yellow("Mesmo lance da partida. Tente outro."),
                    Ok(Attempt::Different(record)) => {
                        visual::print_success(&format!("Tentativa: {}. Peça 'solution' para comparar.", record.san));
                    }
                    Err(e) => visual::print_error(&e.to_string()),
                },
                Err(e) => visual::print_error(&e.to_string()),
            },
        }
    }
    Ok(false)
}

async fn ask_mentor(exercise: &LabExercise, mentor: Option<&MentorRequester>, request: LabRequest) {
    let Some(mentor) = mentor else {
        visual::print_error("Mentor desligado: configure a chave da API.");
        return;
    };
    let spinner = visual::MentorSpinner::start("Aristóteles está pensando...");
    let reply = timeout(config::MENTOR_TIMEOUT, mentor.request(&exercise.mentor_context(request))).await;
    spinner.finish();
    match reply {
        Ok(Ok(commentary)) => println!("🦉 {}", commentary.text),
        Ok(Err(e)) => visual::print_error(&format!("Mentor: {e}")),
        Err(_) => visual::print_error("Mentor não respondeu a tempo."),
    }
}
