// src/settings.rs
// Configurações do mentor (arquivo JSON + variáveis de ambiente)

use std::{env, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentorSettings {
    pub provider:    String,
    pub api_key:     Option<String>,
    pub model:       String,
    pub temperature: f32,
    pub max_tokens:  u32,
    pub endpoint:    String,
}

impl Default for MentorSettings {
    fn default() -> Self {
        Self {
            provider:    "openai".into(),
            api_key:     None,
            model:       config::DEFAULT_MODEL.into(),
            temperature: config::DEFAULT_TEMPERATURE,
            max_tokens:  config::DEFAULT_MAX_TOKENS,
            endpoint:    config::OPENAI_ENDPOINT.into(),
        }
    }
}

impl MentorSettings {
    /// Carrega do arquivo (se existir) e aplica OPENAI_API_KEY / MENTOR_MODEL por cima.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let file = File::open(path).with_context(|| format!("abrir {}", path.display()))?;
            let parsed: Self = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("configuração inválida em {}", path.display()))?;
            info!("configurações do mentor carregadas de {}", path.display());
            parsed
        } else {
            debug!("{} não encontrado; usando padrões", path.display());
            Self::default()
        };
        settings.apply_env(|k| env::var(k).ok());
        Ok(settings)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(model) = var("MENTOR_MODEL").filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
    }
}
