//src/visual.rs
// Interface visual para o terminal: tabuleiro, insights e spinner do mentor

use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use shakmaty::{Chess, Color, File, Piece, Position, Rank, Role, Square};

use crate::{
    clock::Clock,
    lab::LabExercise,
    quality::MoveQuality,
    rules::{color_label, GameResult, MoveRecord},
    session::{Annotations, Insight, SessionConfig, Termination},
    statistics::QualityTally,
    utils::format_clock,
};

// Mensagens coloridas
pub fn console_yellow(message: &str) {
    println!("{}", message.yellow());
}

pub fn print_error(message: &str) {
    println!("{}", message.red().bold());
}

pub fn print_success(message: &str) {
    println!("{}", message.green().bold());
}

// Imprime o cabeçalho principal
pub fn print_main_header() {
    println!("\n{}", "♟️  Mentor de Xadrez".blue().bold());
    println!("{}", "═".repeat(50).cyan());
}

// Imprime informações do Stockfish
pub fn print_stockfish_info(engine_path: &str, ready: bool) {
    let state = if ready { "pronto".green() } else { "indisponível (modo sem análise)".red() };
    println!("{} {} [{}]", "Usando Stockfish em:".blue().bold(), engine_path, state);
}

pub fn print_configurations(config: &SessionConfig, increment_secs: u32) {
    println!("{}", "⚙️  Configurações:".cyan().bold());
    println!("🎨 Cor:             {}", color_label(config.color).cyan());
    println!("⏱️  Tempo:           {} ({} +{}s)", config.time_control.cyan(), format_clock(config.initial_time_secs), increment_secs);
    println!("📶 Nível:           {}", config.difficulty.to_string().cyan());
    println!("🦉 Mentor:          {}", if config.mentor_enabled { "ligado".green() } else { "desligado".red() });
    println!("🆔 Partida:         {}\n", config.game_id.magenta());
}

pub fn print_help() {
    println!("{}", "Comandos:".cyan().bold());
    println!("  e2e4 | e7e8q     joga o lance (UCI)");
    println!("  hint <casa>      mostra destinos legais da peça");
    println!("  arrow <de> <para> liga/desliga uma seta");
    println!("  board            redesenha o tabuleiro");
    println!("  resign           desiste da partida");
    println!("  save             tenta gravar de novo após falha");
    println!("  quit             sai\n");
}

/// Peça em Unicode.
pub fn piece_glyph(piece: Piece) -> char {
    match (piece.color, piece.role) {
        (Color::White, Role::King)   => '♔',
        (Color::White, Role::Queen)  => '♕',
        (Color::White, Role::Rook)   => '♖',
        (Color::White, Role::Bishop) => '♗',
        (Color::White, Role::Knight) => '♘',
        (Color::White, Role::Pawn)   => '♙',
        (Color::Black, Role::King)   => '♚',
        (Color::Black, Role::Queen)  => '♛',
        (Color::Black, Role::Rook)   => '♜',
        (Color::Black, Role::Bishop) => '♝',
        (Color::Black, Role::Knight) => '♞',
        (Color::Black, Role::Pawn)   => '♟',
    }
}

/// Desenha o tabuleiro do ponto de vista do jogador, com seleção, dicas e último lance.
pub fn render_board(position: &Chess, orientation: Color, annotations: &Annotations, last_move: Option<&MoveRecord>) {
    let last: Vec<Square> = last_move
        .map(|m| [m.uci.get(0..2), m.uci.get(2..4)])
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|s| s.parse::<Square>().ok())
        .collect();

    let ranks: Vec<u32> = match orientation {
        Color::White => (0..8).rev().collect(),
        Color::Black => (0..8).collect(),
    };
    let files: Vec<u32> = match orientation {
        Color::White => (0..8).collect(),
        Color::Black => (0..8).rev().collect(),
    };

    println!();
    for &r in &ranks {
        let mut line = format!(" {} ", r + 1);
        for &f in &files {
            let sq = Square::from_coords(File::new(f), Rank::new(r));
            let glyph = match position.board().piece_at(sq) {
                Some(p) => piece_glyph(p).to_string(),
                None if annotations.hints.contains(&sq) => "·".to_string(),
                None => " ".to_string(),
            };
            let cell = format!(" {glyph} ");
            let cell = if annotations.selected == Some(sq) {
                cell.on_yellow()
            } else if annotations.hints.contains(&sq) {
                cell.on_green()
            } else if last.contains(&sq) {
                cell.on_cyan()
            } else if (f + r) % 2 == 1 {
                cell.on_white()
            } else {
                cell.on_bright_black()
            };
            line.push_str(&cell.to_string());
        }
        println!("{line}");
    }
    let footer: String = files.iter().map(|&f| format!(" {} ", (b'a' + f as u8) as char)).collect();
    println!("   {footer}");

    for (from, to) in &annotations.arrows {
        println!("   {} {from} → {to}", "↗".magenta());
    }
}

pub fn print_clock(clock: &Clock, turn: Color) {
    let show = |c: Color| {
        let text = format!("{} {}", color_label(c), format_clock(clock.remaining(c)));
        if c == turn { text.bold().to_string() } else { text.dimmed().to_string() }
    };
    println!("⏱️  {}  |  {}", show(Color::White), show(Color::Black));
}

pub fn colored_quality(quality: MoveQuality) -> ColoredString {
    match quality {
        MoveQuality::Best    => quality.as_str().green().bold(),
        MoveQuality::Good    => quality.as_str().cyan(),
        MoveQuality::Mistake => quality.as_str().yellow(),
        MoveQuality::Blunder => quality.as_str().red().bold(),
    }
}

pub fn print_move(record: &MoveRecord, by_engine: bool) {
    let who = if by_engine { "Engine".magenta() } else { "Você".blue() };
    let number = match record.color {
        Color::White => format!("{}.", record.move_number),
        Color::Black => format!("{}...", record.move_number),
    };
    println!("{who}: {number} {}", record.san.bold());
}

pub fn print_insight(insight: &Insight) {
    println!(
        "{} {} [{}] {}",
        "🦉".yellow(),
        insight.move_notation.bold(),
        colored_quality(insight.quality),
        format!("({:+})", insight.evaluation_after).dimmed(),
    );
    println!("   {}", insight.commentary.italic());
}

pub fn print_game_over(result: GameResult, termination: Termination) {
    let reason = match termination {
        Termination::Checkmate   => "xeque-mate",
        Termination::Draw        => "empate",
        Termination::Resignation => "desistência",
        Termination::TimeForfeit => "tempo esgotado",
    };
    println!("\n{} {} ({reason})", "Fim de jogo:".cyan().bold(), result.as_pgn().bold());
}

pub fn render_summary(tally: &QualityTally) {
    println!("{}", "Resumo da análise:".cyan().bold());
    for q in MoveQuality::ALL {
        println!("- {}: {}", colored_quality(q), tally.get(q));
    }
    println!("- Lances comentados: {}", tally.total());
}

// Laboratório
pub fn print_lab_help() {
    println!("{}", "Laboratório:".cyan().bold());
    println!("  e2e4             tenta outro lance na posição");
    println!("  hint             pede uma dica ao mentor");
    println!("  solution         pede a solução ao mentor");
    println!("  next             próximo erro");
    println!("  quit             sai\n");
}

pub fn print_lab_exercise(index: usize, total: usize, exercise: &LabExercise) {
    let number = match exercise.player_color {
        Color::White => format!("{}.", exercise.move_number),
        Color::Black => format!("{}...", exercise.move_number),
    };
    println!(
        "\n{} {}/{}  {} {}",
        "🧪 Erro".cyan().bold(),
        index + 1,
        total,
        exercise.played_at.format("%d/%m/%Y %H:%M").to_string().dimmed(),
        exercise.game_id.magenta(),
    );
    println!(
        "Você jogou {number} {} [{}] {}",
        exercise.move_notation.bold(),
        colored_quality(exercise.quality),
        format!("({:+})", exercise.evaluation_after).dimmed(),
    );
    if !exercise.commentary.is_empty() {
        println!("   {}", exercise.commentary.italic());
    }
}

/// Spinner exibido enquanto o mentor pensa.
pub struct MentorSpinner {
    bar: ProgressBar,
}

impl MentorSpinner {
    pub fn start(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.yellow} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}
