// src/utils.rs
// ---------------------------------------------------------------------------
// Utilitários de PGN, arquivos e formatação.
// ---------------------------------------------------------------------------

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use log::trace;
use pgn_reader::{BufferedReader, RawHeader, SanPlus, Skip, Visitor};
use shakmaty::Color;

use crate::rules::{GameResult, MoveRecord};

// ---------------------------------------------------------------------------
// Build PGN - cabeçalhos + linha principal
// ---------------------------------------------------------------------------
/// Linha de lances numerada ("1. e4 e5 2. Nf3"), sem resultado.
pub fn movetext(moves: &[MoveRecord]) -> String {
    let mut out = String::new();
    for (i, m) in moves.iter().enumerate() {
        if !out.is_empty() { out.push(' '); }
        match m.color {
            Color::White => out.push_str(&format!("{}. ", m.move_number)),
            // Lance preto abrindo a linha precisa do número com reticências
            Color::Black if i == 0 => out.push_str(&format!("{}... ", m.move_number)),
            Color::Black => {}
        }
        out.push_str(&m.san);
    }
    out
}

/// Constrói o PGN completo a partir dos cabeçalhos e dos lances aplicados
pub fn build_pgn<K, V>(hdr: &IndexMap<K, V>, moves: &[MoveRecord], result: GameResult) -> String
where K: AsRef<str>, V: AsRef<str> {
    let mut pgn = String::new();
    for (k, v) in hdr {
        pgn.push_str(&format!("[{} \"{}\"]\n", k.as_ref(), v.as_ref().replace('"', "'")));
    }
    pgn.push('\n');

    let line = movetext(moves);
    if !line.is_empty() {
        pgn.push_str(&line);
        pgn.push(' ');
    }
    pgn.push_str(result.as_pgn());
    pgn
}

// ---------------------------------------------------------------------------
// Leitura de PGN - Visitor que coleta a linha principal de uma partida
// ---------------------------------------------------------------------------
struct MainLine {
    sans:    Vec<SanPlus>,
    headers: usize,
}

impl Visitor for MainLine {
    type Result = ();
    fn begin_game(&mut self) { self.sans.clear(); self.headers = 0; }
    fn header(&mut self, _: &[u8], _: RawHeader<'_>) { self.headers += 1; }
    fn san(&mut self, sp: SanPlus) { self.sans.push(sp); }
    fn begin_variation(&mut self) -> Skip { Skip(true) }  // Variantes não entram na reconstrução
    fn end_game(&mut self) -> Self::Result {}
}

/// Lances SAN da primeira partida do texto PGN, na ordem.
pub fn read_movetext(pgn: &str) -> Result<Vec<SanPlus>> {
    let mut reader = BufferedReader::new_cursor(pgn.as_bytes());
    let mut visitor = MainLine { sans: Vec::new(), headers: 0 };
    reader
        .read_game(&mut visitor)
        .context("ler PGN")?
        .ok_or_else(|| anyhow!("PGN vazio"))?;
    trace!("PGN lido: {} cabeçalhos, {} lances", visitor.headers, visitor.sans.len());
    Ok(visitor.sans)
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------
/// Garante que um diretório exista, criando-o se necessário
pub fn ensure_dir_exists(dir: &Path) -> Result<()> {
    if dir.exists() { return Ok(()); }
    fs::create_dir_all(dir).with_context(|| format!("criar {}", dir.display()))
}

/// Detecta caminho do executável Stockfish
pub fn detect_stockfish_path() -> Result<String> {
    let local = PathBuf::from("./stockfish");
    if local.exists() { return Ok(local.to_string_lossy().into()); }
    let probe = Command::new("stockfish")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .and_then(|mut child| { let _ = child.kill(); child.wait() });
    if probe.is_ok() { return Ok("stockfish".into()); }
    Err(anyhow!("Stockfish não encontrado"))
}

/// Segundos como "m:ss"
pub fn format_clock(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
