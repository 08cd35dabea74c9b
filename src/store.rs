// src/store.rs
// Persistência das partidas encerradas: um JSON por partida + arquivo PGN acumulado

use std::{
    fs::{self, File, OpenOptions},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shakmaty::Color;

use crate::{
    clock::Clock,
    config,
    rules::{color_name, GameResult},
    session::{Insight, Termination},
    statistics::QualityTally,
    utils::ensure_dir_exists,
};

/// Registro gravado no fim da partida.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id:           String,
    #[serde(with = "color_name")]
    pub player_color:      Color,
    #[serde(with = "result_label")]
    pub result:            GameResult,
    pub termination:       Option<Termination>,
    pub pgn:               String,
    pub final_fen:         String,
    pub analysis_summary:  QualityTally,
    pub insights:          Vec<Insight>,
    pub time_control:      String,
    pub initial_time_secs: u32,
    pub increment_secs:    u32,
    pub clock:             Clock,
    pub difficulty:        u8,
    pub mentor_enabled:    bool,
    pub saved_at:          DateTime<Utc>,
}

/// Resultado como "1-0" / "0-1" / "1/2-1/2" / "*".
mod result_label {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::rules::GameResult;

    pub fn serialize<S: Serializer>(result: &GameResult, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(result.as_pgn())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<GameResult, D::Error> {
        let raw = String::deserialize(d)?;
        GameResult::from_pgn(&raw).ok_or_else(|| D::Error::custom(format!("resultado inválido: {raw}")))
    }
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn save(&self, record: &GameRecord) -> Result<()>;
    async fn load(&self, game_id: &str) -> Result<GameRecord>;
    /// Até `limit` partidas, da mais recente para a mais antiga.
    async fn recent(&self, limit: usize) -> Result<Vec<GameRecord>>;
}

/// Diretório de partidas em JSON; o PGN de cada partida também vai para `games.pgn`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir:     PathBuf,
    archive: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let archive = dir.join(config::PGN_ARCHIVE);
        Self { dir, archive }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, game_id: &str) -> Result<PathBuf> {
        let valid = !game_id.is_empty()
            && game_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!("identificador de partida inválido: {game_id:?}");
        }
        Ok(self.dir.join(format!("{game_id}.json")))
    }

    fn write_record(&self, record: &GameRecord) -> Result<PathBuf> {
        ensure_dir_exists(&self.dir)?;
        let path = self.record_path(&record.game_id)?;

        // Grava em arquivo temporário e renomeia: nunca deixa JSON pela metade
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record).context("serializar partida")?;
        fs::write(&tmp, json).with_context(|| format!("gravar {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("renomear para {}", path.display()))?;

        let mut archive = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.archive)
            .with_context(|| format!("abrir {}", self.archive.display()))?;
        writeln!(archive, "{}\n", record.pgn).context("Falha ao escrever partida no arquivo PGN")?;
        Ok(path)
    }

    fn read_record(&self, game_id: &str) -> Result<GameRecord> {
        let path = self.record_path(game_id)?;
        let file = File::open(&path).with_context(|| format!("abrir {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file)).with_context(|| format!("partida inválida em {}", path.display()))
    }

    fn read_recent(&self, limit: usize) -> Result<Vec<GameRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).with_context(|| format!("listar {}", self.dir.display()))?;
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.context("ler entrada do diretório")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = File::open(&path)
                .map_err(anyhow::Error::from)
                .and_then(|f| serde_json::from_reader::<_, GameRecord>(BufReader::new(f)).map_err(anyhow::Error::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("ignorando {}: {e}", path.display()),
            }
        }
        records.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn save(&self, record: &GameRecord) -> Result<()> {
        let store = self.clone();
        let record = record.clone();
        let path = tokio::task::spawn_blocking(move || store.write_record(&record))
            .await
            .map_err(|e| anyhow!("tarefa de gravação interrompida: {e}"))??;
        info!("partida gravada em {}", path.display());
        Ok(())
    }

    async fn load(&self, game_id: &str) -> Result<GameRecord> {
        let store = self.clone();
        let id = game_id.to_string();
        let record = tokio::task::spawn_blocking(move || store.read_record(&id))
            .await
            .map_err(|e| anyhow!("tarefa de leitura interrompida: {e}"))??;
        debug!("partida {game_id} carregada ({} insights)", record.insights.len());
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<GameRecord>> {
        let store = self.clone();
        let records = tokio::task::spawn_blocking(move || store.read_recent(limit))
            .await
            .map_err(|e| anyhow!("tarefa de listagem interrompida: {e}"))??;
        debug!("{} partidas recentes em {}", records.len(), self.dir.display());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::MoveQuality;

    fn sample(game_id: &str) -> GameRecord {
        GameRecord {
            game_id: game_id.into(),
            player_color: Color::Black,
            result: GameResult::WhiteWins,
            termination: Some(Termination::Resignation),
            pgn: "[Event \"Chess Mentor\"]\n\n1. e4 e5 1-0".into(),
            final_fen: "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2".into(),
            analysis_summary: QualityTally { good: 1, ..Default::default() },
            insights: vec![Insight {
                move_number: 1,
                move_notation: "e5".into(),
                quality: MoveQuality::Good,
                commentary: "Clássico.".into(),
                fen_after: "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2".into(),
                evaluation_after: -20,
                mentor_verdict: None,
            }],
            time_control: "3|2".into(),
            initial_time_secs: 180,
            increment_secs: 2,
            clock: Clock { white: 175, black: 170 },
            difficulty: 2,
            mentor_enabled: true,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn record_uses_plain_labels() {
        let json = serde_json::to_value(sample("abc")).unwrap();
        assert_eq!(json["player_color"], "black");
        assert_eq!(json["result"], "1-0");
        assert_eq!(json["termination"], "resignation");
        assert_eq!(json["analysis_summary"]["good"], 1);
        assert_eq!(json["insights"][0]["quality"], "Good");
    }

    #[tokio::test]
    async fn saves_loads_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("games"));
        let record = sample("game-1");
        store.save(&record).await.unwrap();
        store.save(&sample("game-2")).await.unwrap();

        assert_eq!(store.load("game-1").await.unwrap(), record);
        let archive = fs::read_to_string(store.dir().join(config::PGN_ARCHIVE)).unwrap();
        assert_eq!(archive.matches("[Event \"Chess Mentor\"]").count(), 2);
        assert!(!store.dir().join("game-1.json.tmp").exists());
    }

    #[tokio::test]
    async fn recent_lists_newest_first_and_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("games"));
        assert!(store.recent(10).await.unwrap().is_empty());

        let now = Utc::now();
        for (id, age) in [("old", 30), ("new", 0), ("mid", 10)] {
            let record = GameRecord { saved_at: now - chrono::Duration::minutes(age), ..sample(id) };
            store.save(&record).await.unwrap();
        }
        fs::write(store.dir().join("broken.json"), "{").unwrap();

        let ids: Vec<String> = store.recent(10).await.unwrap().into_iter().map(|r| r.game_id).collect();
        assert_eq!(ids, ["new", "mid", "old"]);
        assert_eq!(store.recent(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejects_bad_ids_and_missing_games() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.load("nope").await.is_err());
        assert!(store.save(&sample("a/b")).await.is_err());
    }
}
