// src/error.rs
// ---------------------------------------------------------------------------
// Taxonomia de erros do domínio. Bordas de I/O continuam usando anyhow.
// ---------------------------------------------------------------------------

use thiserror::Error;

use crate::session::Status;

/// Lance recusado pelo adaptador de regras; nenhuma mudança de estado.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lance ilegal: {0}")]
pub struct IllegalMove(pub String);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    IllegalMove(#[from] IllegalMove),
    #[error("partida não está ativa ({0:?})")]
    NotActive(Status),
    #[error("não é a vez do jogador")]
    NotHumanTurn,
    #[error("análise do lance anterior ainda pendente")]
    AnalysisPending,
    #[error("sessão já iniciada ({0:?})")]
    AlreadyStarted(Status),
    #[error("nada a salvar: sessão em {0:?}")]
    NothingToPersist(Status),
    #[error("falha ao salvar partida: {0}")]
    Persistence(String),
    #[error("sessão encerrada")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// Chamada antes do handshake (ou com o processo perdido): descartada, não enfileirada.
    #[error("avaliador indisponível")]
    NotReady,
    #[error("falha de I/O com o avaliador: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MentorError {
    #[error("chave da API não configurada")]
    MissingApiKey,
    #[error("provedor não suportado: {0} (apenas openai)")]
    UnsupportedProvider(String),
    #[error("modelo não suportado: {0}")]
    UnsupportedModel(String),
    #[error("erro HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("falha de transporte: {0}")]
    Transport(String),
    #[error("resposta sem conteúdo")]
    EmptyResponse,
    #[error("tempo esgotado aguardando o mentor")]
    Timeout,
}
