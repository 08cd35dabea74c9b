// src/mentor.rs
// ---------------------------------------------------------------------------
// Mentor de comentários: monta o contexto, chama o serviço de texto e, na
// falta de rótulo estruturado, infere a qualidade por palavras-chave.
// ---------------------------------------------------------------------------

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    config::{CRITICAL_TIME_SECS, FALLBACK_MODEL, MODERATE_TIME_SECS},
    error::MentorError,
    quality::MoveQuality,
    settings::MentorSettings,
    utils::format_clock,
};

/// Persona fixa enviada como instrução de sistema.
pub const MENTOR_PERSONA: &str = "\
Você é Aristóteles, um mentor de xadrez filosófico com ironia socrática.
Sábio mas irreverente; ironia educativa, nunca cruel; parceiro de pensamento, não juiz.
Prioridades de análise: 1) contexto temporal (relógio), 2) momentum dos últimos lances,
3) tensão posicional lida do FEN, 4) qualidade tática do lance.
Blunder: ironia pesada e uma lição pontual. Mistake: provocação leve e uma dica sutil.
Good: reconhecimento relutante. Best: admiração genuína.
Com pouco tempo no relógio, seja mais compreensivo. Depois de erros seguidos, encoraje.
Nunca use frases genéricas; no máximo 2 sentenças.";

/// Lance recente com o rótulo que recebeu (quando analisado).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentMove {
    pub notation: String,
    pub quality:  Option<MoveQuality>,
}

/// Contexto efêmero entregue ao serviço de texto.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MentorContext {
    pub fen:            String,
    pub last_move:      String,
    pub quality:        MoveQuality,
    pub best_move:      Option<String>,
    pub evaluation:     i32,          // cp, perspectiva de quem jogou
    pub time_remaining: Option<u32>,  // segundos de quem jogou
    pub recent_moves:   Vec<RecentMove>,
    pub pgn:            Option<String>,
    pub user_prompt:    Option<String>, // Pedido livre (dica, solução)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePressure { Critical, Moderate, Relaxed }

impl TimePressure {
    pub fn from_secs(secs: u32) -> Self {
        if secs < CRITICAL_TIME_SECS { TimePressure::Critical }
        else if secs < MODERATE_TIME_SECS { TimePressure::Moderate }
        else { TimePressure::Relaxed }
    }
}

/// Algum erro (Mistake/Blunder) entre os lances recentes.
pub fn has_negative_momentum(recent: &[RecentMove]) -> bool {
    recent.iter().any(|m| m.quality.is_some_and(MoveQuality::is_error))
}

/// Monta o prompt do usuário: tempo, momentum, posição e, por fim, o lance.
pub fn build_prompt(ctx: &MentorContext) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(secs) = ctx.time_remaining {
        parts.push(format!("Tempo restante: {}", format_clock(secs)));
        match TimePressure::from_secs(secs) {
            TimePressure::Critical => parts.push("PRESSÃO DE TEMPO CRÍTICA - seja compreensivo mas irônico".into()),
            TimePressure::Moderate => parts.push("Tempo moderado - decisões rápidas necessárias".into()),
            TimePressure::Relaxed  => {}
        }
    }

    if !ctx.recent_moves.is_empty() {
        let list: Vec<String> = ctx
            .recent_moves
            .iter()
            .map(|m| match m.quality {
                Some(q) => format!("{} ({q})", m.notation),
                None    => m.notation.clone(),
            })
            .collect();
        parts.push(format!("Últimos lances: {}", list.join(", ")));
        if has_negative_momentum(&ctx.recent_moves) {
            parts.push("MOMENTUM NEGATIVO detectado - considere encorajamento sutil".into());
        }
    }

    parts.push(format!("Posição FEN: {}", ctx.fen));
    if let Some(pgn) = ctx.pgn.as_deref().filter(|p| !p.is_empty()) {
        parts.push(format!("PGN: {pgn}"));
    }
    parts.push(format!("Lance jogado: {}", ctx.last_move));
    parts.push(format!("Qualidade do lance: {}", ctx.quality));
    if let Some(best) = &ctx.best_move {
        parts.push(format!("Melhor lance sugerido: {best}"));
    }
    parts.push(format!("Avaliação da posição: {:+}", ctx.evaluation));
    if let Some(request) = ctx.user_prompt.as_deref().filter(|r| !r.trim().is_empty()) {
        parts.push(format!("\nPedido específico: {request}"));
    }
    parts.push("\nResponda em português BR, no máximo 2 sentenças, priorizando contexto temporal e momentum.".into());

    parts.join("\n")
}

// ---------------------------------------------------------------------------
// Heurística de último recurso
// ---------------------------------------------------------------------------
const BLUNDER_WORDS: &[&str] = &["desastre", "presente", "entregou", "suicídio", "catástrofe", "disaster", "gave away", "blunder"];
const MISTAKE_WORDS: &[&str] = &["impreciso", "imprecis", "poderia ser melhor", "imprecise", "could be better", "inaccura"];
const BEST_WORDS: &[&str]    = &["magistral", "brilhante", "excelente", "genial", "excellent", "brilliant"];

/// Rótulo aproximado a partir do texto livre. Só vale quando o serviço não devolve rótulo.
pub fn infer_quality(text: &str) -> MoveQuality {
    let lower = text.to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if hit(BLUNDER_WORDS) { MoveQuality::Blunder }
    else if hit(MISTAKE_WORDS) { MoveQuality::Mistake }
    else if hit(BEST_WORDS) { MoveQuality::Best }
    else { MoveQuality::Good }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictSource { Structured, Heuristic }

/// Rótulo do mentor, marcado com a origem (campo do serviço ou heurística).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub label:  MoveQuality,
    pub source: VerdictSource,
}

/// Resposta crua do serviço de texto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentorResponse {
    pub text:    String,
    pub quality: Option<MoveQuality>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commentary {
    pub text:    String,
    pub verdict: QualityVerdict,
    pub model:   String,
}

#[async_trait]
pub trait MentorService: Send + Sync {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<MentorResponse, MentorError>;
}

/// Transforma um `MentorContext` em prosa. Não toca no estado da sessão.
pub struct MentorRequester {
    service:        Arc<dyn MentorService>,
    model:          String,
    fallback_model: String,
}

impl MentorRequester {
    pub fn new(service: Arc<dyn MentorService>, model: impl Into<String>) -> Self {
        Self { service, model: model.into(), fallback_model: FALLBACK_MODEL.into() }
    }

    pub fn with_fallback(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = model.into();
        self
    }

    /// Modelo recusado → exatamente uma nova tentativa com o modelo reserva.
    pub async fn request(&self, ctx: &MentorContext) -> Result<Commentary, MentorError> {
        let prompt = build_prompt(ctx);
        let (model, response) = match self.service.complete(&self.model, MENTOR_PERSONA, &prompt).await {
            Ok(r) => (self.model.clone(), r),
            Err(MentorError::UnsupportedModel(msg)) => {
                warn!("modelo {} recusado ({msg}); tentando {}", self.model, self.fallback_model);
                let r = self.service.complete(&self.fallback_model, MENTOR_PERSONA, &prompt).await?;
                (self.fallback_model.clone(), r)
            }
            Err(e) => return Err(e),
        };

        let verdict = match response.quality {
            Some(label) => QualityVerdict { label, source: VerdictSource::Structured },
            None        => QualityVerdict { label: infer_quality(&response.text), source: VerdictSource::Heuristic },
        };
        debug!("mentor ({model}) respondeu {} caracteres", response.text.len());
        Ok(Commentary { text: response.text, verdict, model })
    }
}

// ---------------------------------------------------------------------------
// Serviço OpenAI (chat completions)
// ---------------------------------------------------------------------------
pub struct OpenAiMentor {
    client:      Client,
    api_key:     String,
    endpoint:    String,
    temperature: f32,
    max_tokens:  u32,
}

impl OpenAiMentor {
    pub fn from_settings(settings: &MentorSettings) -> Result<Self, MentorError> {
        if !settings.provider.trim().eq_ignore_ascii_case("openai") {
            return Err(MentorError::UnsupportedProvider(settings.provider.clone()));
        }
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(MentorError::MissingApiKey)?;
        Ok(Self {
            client: Client::new(),
            api_key,
            endpoint: settings.endpoint.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

#[async_trait]
impl MentorService for OpenAiMentor {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<MentorResponse, MentorError> {
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MentorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status.as_u16(), &text));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| MentorError::Transport(format!("resposta inválida: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(MentorError::EmptyResponse)?;
        Ok(MentorResponse { text, quality: None })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model:       &'a str,
    messages:    Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens:  u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role:    &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    code:    Option<String>,
}

/// Erro HTTP → `MentorError`; recusas de modelo viram `UnsupportedModel`.
pub fn map_http_error(status: u16, body: &str) -> MentorError {
    let (message, code) = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(wrapper) => (wrapper.error.message, wrapper.error.code),
        Err(_)      => (body.to_string(), None),
    };
    let lower = message.to_lowercase();
    let model_rejected = code.as_deref() == Some("model_not_found")
        || (matches!(status, 400 | 404) && (lower.contains("model") || lower.contains("not supported")));
    if model_rejected {
        MentorError::UnsupportedModel(message)
    } else {
        MentorError::Http { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serviço roteirizado: devolve as respostas na ordem e registra os modelos pedidos.
    struct Scripted {
        replies: Mutex<Vec<Result<MentorResponse, MentorError>>>,
        models:  Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<MentorResponse, MentorError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self { replies: Mutex::new(replies), models: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl MentorService for Scripted {
        async fn complete(&self, model: &str, _system: &str, _user: &str) -> Result<MentorResponse, MentorError> {
            self.models.lock().unwrap().push(model.to_string());
            self.replies.lock().unwrap().pop().unwrap_or(Err(MentorError::EmptyResponse))
        }
    }

    fn text(t: &str) -> Result<MentorResponse, MentorError> {
        Ok(MentorResponse { text: t.into(), quality: None })
    }

    fn context() -> MentorContext {
        MentorContext {
            fen: "rnbqkbnr/pppp1ppp/8/4p2Q/4P3/8/PPPP1PPP/RNB1KBNR b KQkq - 1 2".into(),
            last_move: "Qh5".into(),
            quality: MoveQuality::Blunder,
            best_move: Some("g1f3".into()),
            evaluation: -150,
            time_remaining: Some(45),
            recent_moves: vec![
                RecentMove { notation: "e4".into(), quality: Some(MoveQuality::Good) },
                RecentMove { notation: "Qh5".into(), quality: Some(MoveQuality::Blunder) },
            ],
            pgn: Some("1. e4 e5 2. Qh5".into()),
            user_prompt: None,
        }
    }

    #[test]
    fn prompt_puts_time_and_momentum_first() {
        let prompt = build_prompt(&context());
        let time = prompt.find("PRESSÃO DE TEMPO CRÍTICA").unwrap();
        let momentum = prompt.find("MOMENTUM NEGATIVO").unwrap();
        let fen = prompt.find("Posição FEN").unwrap();
        let quality = prompt.find("Qualidade do lance: Blunder").unwrap();
        assert!(time < momentum && momentum < fen && fen < quality);
        assert!(prompt.contains("Tempo restante: 0:45"));
        assert!(prompt.contains("Últimos lances: e4 (Good), Qh5 (Blunder)"));
        assert!(prompt.contains("Avaliação da posição: -150"));
        assert!(prompt.contains("Melhor lance sugerido: g1f3"));
    }

    #[test]
    fn prompt_flags_moderate_and_relaxed_time() {
        let mut ctx = context();
        ctx.time_remaining = Some(120);
        ctx.recent_moves.clear();
        let prompt = build_prompt(&ctx);
        assert!(prompt.contains("Tempo moderado"));
        assert!(!prompt.contains("MOMENTUM"));

        ctx.time_remaining = Some(600);
        ctx.evaluation = 25;
        let prompt = build_prompt(&ctx);
        assert!(!prompt.contains("Tempo moderado") && !prompt.contains("CRÍTICA"));
        assert!(prompt.contains("Avaliação da posição: +25"));
    }

    #[test]
    fn specific_request_goes_last_before_the_reply_rules() {
        let mut ctx = context();
        assert!(!build_prompt(&ctx).contains("Pedido específico"));

        ctx.user_prompt = Some("Qual é o melhor lance nesta posição?".into());
        let prompt = build_prompt(&ctx);
        let request = prompt.find("Pedido específico: Qual é o melhor lance nesta posição?").unwrap();
        assert!(prompt.find("Avaliação da posição").unwrap() < request);
        assert!(request < prompt.find("Responda em português BR").unwrap());

        ctx.user_prompt = Some("   ".into());
        assert!(!build_prompt(&ctx).contains("Pedido específico"));
    }

    #[test]
    fn time_pressure_boundaries() {
        assert_eq!(TimePressure::from_secs(59), TimePressure::Critical);
        assert_eq!(TimePressure::from_secs(60), TimePressure::Moderate);
        assert_eq!(TimePressure::from_secs(179), TimePressure::Moderate);
        assert_eq!(TimePressure::from_secs(180), TimePressure::Relaxed);
    }

    #[test]
    fn keyword_heuristic() {
        assert_eq!(infer_quality("Que desastre, você entregou a dama."), MoveQuality::Blunder);
        assert_eq!(infer_quality("That gave away the rook."), MoveQuality::Blunder);
        assert_eq!(infer_quality("Impreciso. Cavalo em f3 seria mais incisivo."), MoveQuality::Mistake);
        assert_eq!(infer_quality("Magistral. Até eu me curvaria."), MoveQuality::Best);
        assert_eq!(infer_quality("Competente. Sem brilho, mas sólido."), MoveQuality::Good);
    }

    #[tokio::test]
    async fn unsupported_model_retries_once_with_fallback() {
        let service = Scripted::new(vec![
            Err(MentorError::UnsupportedModel("model gpt-x does not exist".into())),
            text("Magistral."),
        ]);
        let requester = MentorRequester::new(service.clone(), "gpt-x").with_fallback("gpt-4o-mini");
        let c = requester.request(&context()).await.unwrap();
        assert_eq!(c.model, "gpt-4o-mini");
        assert_eq!(c.verdict, QualityVerdict { label: MoveQuality::Best, source: VerdictSource::Heuristic });
        assert_eq!(*service.models.lock().unwrap(), vec!["gpt-x".to_string(), "gpt-4o-mini".to_string()]);
    }

    #[tokio::test]
    async fn fallback_failure_is_surfaced_without_more_retries() {
        let service = Scripted::new(vec![
            Err(MentorError::UnsupportedModel("nope".into())),
            Err(MentorError::UnsupportedModel("still nope".into())),
            text("never reached"),
        ]);
        let requester = MentorRequester::new(service.clone(), "gpt-x");
        assert!(matches!(requester.request(&context()).await, Err(MentorError::UnsupportedModel(_))));
        assert_eq!(service.models.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn other_errors_do_not_retry() {
        let service = Scripted::new(vec![Err(MentorError::Http { status: 500, message: "boom".into() }), text("x")]);
        let requester = MentorRequester::new(service.clone(), "gpt-4o");
        assert!(matches!(requester.request(&context()).await, Err(MentorError::Http { status: 500, .. })));
        assert_eq!(service.models.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn structured_quality_wins_over_keywords() {
        let service = Scripted::new(vec![Ok(MentorResponse { text: "Que desastre!".into(), quality: Some(MoveQuality::Good) })]);
        let requester = MentorRequester::new(service, "gpt-4o");
        let c = requester.request(&context()).await.unwrap();
        assert_eq!(c.verdict, QualityVerdict { label: MoveQuality::Good, source: VerdictSource::Structured });
    }

    #[test]
    fn http_errors_are_classified() {
        let body = r#"{"error":{"message":"The model `gpt-9` does not exist","type":"invalid_request_error","code":"model_not_found"}}"#;
        assert!(matches!(map_http_error(404, body), MentorError::UnsupportedModel(m) if m.contains("gpt-9")));
        assert!(matches!(map_http_error(400, "parameter not supported"), MentorError::UnsupportedModel(_)));
        assert!(matches!(map_http_error(401, r#"{"error":{"message":"Incorrect API key"}}"#), MentorError::Http { status: 401, .. }));
        assert!(matches!(map_http_error(500, "model overloaded"), MentorError::Http { status: 500, .. }));
    }

    #[test]
    fn openai_service_requires_a_key() {
        assert!(matches!(OpenAiMentor::from_settings(&MentorSettings::default()), Err(MentorError::MissingApiKey)));
        let s = MentorSettings { api_key: Some("sk-test".into()), ..Default::default() };
        assert!(OpenAiMentor::from_settings(&s).is_ok());
    }

    #[test]
    fn other_providers_are_refused_even_with_a_key() {
        let s = MentorSettings { api_key: Some("sk-test".into()), provider: "anthropic".into(), ..Default::default() };
        match OpenAiMentor::from_settings(&s) {
            Err(MentorError::UnsupportedProvider(p)) => assert_eq!(p, "anthropic"),
            Err(e) => panic!("erro inesperado: {e}"),
            Ok(_) => panic!("provedor aceito"),
        }
        let upper = MentorSettings { api_key: Some("sk-test".into()), provider: "OpenAI".into(), ..Default::default() };
        assert!(OpenAiMentor::from_settings(&upper).is_ok());
    }
}
