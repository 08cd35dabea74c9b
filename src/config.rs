// Configurações centralizadas do mentor de xadrez

use std::time::Duration;

// Tabela nível de dificuldade → profundidade de busca do avaliador
pub const DEPTH_TABLE: [(u8, u8); 4] = [(1, 8), (2, 10), (3, 12), (4, 15)];
pub const DEFAULT_DEPTH: u8 = 12;                  // Profundidade para níveis fora da tabela
pub const DEFAULT_LEVEL: u8 = 3;

// Limiares de qualidade do lance (delta em cp, perspectiva de quem jogou)
pub const GOOD_THRESHOLD: i32 = -30;               // delta > -30 → Good
pub const BLUNDER_THRESHOLD: i32 = -100;           // delta <= -100 → Blunder
pub const MIN_ANALYSIS_DEPTH: u8 = 10;             // Profundidade mínima para fechar a análise de um lance
pub const MATE_CP: i32 = 10_000;                   // Valor em cp de um mate imediato

// Contexto do mentor
pub const CRITICAL_TIME_SECS: u32 = 60;            // Abaixo disso: pressão de tempo crítica
pub const MODERATE_TIME_SECS: u32 = 180;           // Abaixo disso: pressão moderada
pub const MOMENTUM_WINDOW: usize = 5;              // Últimos lances considerados para momentum

// Serviço de texto do mentor
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const FALLBACK_MODEL: &str = "gpt-4o-mini";    // Usado uma única vez quando o modelo é recusado
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const MENTOR_TIMEOUT: Duration = Duration::from_secs(20);

// Ritmo do oponente automático (atraso artificial, em ms)
pub const ENGINE_DELAY_MIN_MS: u64 = 2500;
pub const ENGINE_DELAY_MAX_MS: u64 = 4500;

// Relógio
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIME_CONTROL: &str = "10|0";
pub const DEFAULT_INITIAL_SECS: u32 = 600;

// Valores para configuração do Stockfish
// Número de threads e tamanho de hash em MB usados no Stockfish
pub const THREADS: u32 = 2;
pub const HASH_MB: u32 = 128;
pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(10);

// Persistência
pub const DEFAULT_GAMES_DIR: &str = "games";
pub const PGN_ARCHIVE: &str = "games.pgn";
pub const SETTINGS_FILE: &str = "mentor_settings.json";
pub const LAB_GAME_LIMIT: usize = 50;               // Partidas recentes revisitadas no laboratório
