// src/lib.rs
// Mentor de xadrez: partida contra o engine com análise e comentários por lance

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod lab;
pub mod mentor;
pub mod quality;
pub mod rules;
pub mod runner;
pub mod session;
pub mod settings;
pub mod statistics;
pub mod store;
pub mod utils;
pub mod visual;
