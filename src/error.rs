//! Errores del dominio de la cola de música.
//!
//! Cada variante corresponde a una familia de fallos con su propia política de
//! recuperación; ninguna de ellas debe detener el drenado de la cola.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MusicError {
    /// El resolver no pudo obtener metadatos para el locator
    #[error("no se pudo resolver `{locator}`: {reason}")]
    Resolve { locator: String, reason: String },

    /// Fallo del almacén clave-valor
    #[error("error de persistencia: {0}")]
    Persistence(String),

    /// El usuario no tiene permiso para la operación
    #[error("operación no autorizada")]
    Unauthorized,

    /// No se pudo establecer la conexión de voz
    #[error("no se pudo unir al canal de voz: {0}")]
    Join(String),

    /// El solicitante no está en ningún canal de voz
    #[error("el solicitante no está en un canal de voz")]
    NoVoiceChannel,

    /// Respuesta HTTP o error de red al abrir una rendition
    #[error("error de transporte: {0}")]
    Transport(String),

    /// Registro persistido con formato inválido
    #[error("registro inválido: {0}")]
    Codec(#[from] serde_json::Error),
}

impl MusicError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}
