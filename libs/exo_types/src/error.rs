// libs/exo_types/src/error.rs
use core::fmt;

/// Type de résultat standard pour les appels au noyau hôte
pub type Result<T> = core::result::Result<T, ExoError>;

/// Codes d'erreur du noyau hôte
///
/// Les appels système renvoient `-(code)` en cas d'échec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Erreur non spécifiée
    Unspecified = 1,

    /// L'env n'existe pas ou l'appelant n'a pas les droits dessus
    BadEnv = 2,

    /// Paramètre invalide
    Inval = 3,

    /// Plus de frame physique disponible
    NoMem = 4,

    /// Table des envs pleine
    NoFreeEnv = 5,

    /// Adresse mémoire invalide
    Fault = 6,

    /// Destinataire IPC pas en attente
    IpcNotRecv = 7,

    /// Fin de fichier
    Eof = 8,

    /// Opération non supportée par cette bibliothèque
    NotSupported = 9,
}

impl ErrorCode {
    /// Décode un retour d'appel système négatif
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(ErrorCode::Unspecified),
            -2 => Some(ErrorCode::BadEnv),
            -3 => Some(ErrorCode::Inval),
            -4 => Some(ErrorCode::NoMem),
            -5 => Some(ErrorCode::NoFreeEnv),
            -6 => Some(ErrorCode::Fault),
            -7 => Some(ErrorCode::IpcNotRecv),
            -8 => Some(ErrorCode::Eof),
            -9 => Some(ErrorCode::NotSupported),
            _ => None,
        }
    }

    /// Valeur de retour brute (négative)
    pub const fn as_raw(self) -> i32 {
        -(self as i32)
    }
}

/// Structure d'erreur pour Exo-OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExoError {
    /// Code d'erreur
    code: ErrorCode,

    /// Message descriptif
    message: Option<&'static str>,

    /// Env concerné, si connu
    context_id: Option<u64>,
}

impl ExoError {
    /// Crée une nouvelle erreur avec un code
    pub const fn new(code: ErrorCode) -> Self {
        ExoError {
            code,
            message: None,
            context_id: None,
        }
    }

    /// Crée une erreur avec un message
    pub const fn with_message(code: ErrorCode, message: &'static str) -> Self {
        ExoError {
            code,
            message: Some(message),
            context_id: None,
        }
    }

    /// Définit un identifiant de contexte
    pub const fn with_context(mut self, id: u64) -> Self {
        self.context_id = Some(id);
        self
    }

    /// Décode un retour d'appel système; `None` si ce n'est pas une erreur connue
    pub fn from_raw(raw: i32) -> Option<Self> {
        ErrorCode::from_raw(raw).map(ExoError::new)
    }

    /// Retourne le code d'erreur
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Retourne le message d'erreur
    pub fn message(&self) -> Option<&'static str> {
        self.message
    }

    pub fn context_id(&self) -> Option<u64> {
        self.context_id
    }
}

impl fmt::Display for ExoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            ErrorCode::Unspecified => write!(f, "Unspecified error"),
            ErrorCode::BadEnv => write!(f, "Bad environment"),
            ErrorCode::Inval => write!(f, "Invalid parameter"),
            ErrorCode::NoMem => write!(f, "Out of memory"),
            ErrorCode::NoFreeEnv => write!(f, "Out of environments"),
            ErrorCode::Fault => write!(f, "Segmentation fault"),
            ErrorCode::IpcNotRecv => write!(f, "Env is not recving"),
            ErrorCode::Eof => write!(f, "Unexpected end of file"),
            ErrorCode::NotSupported => write!(f, "Operation not supported"),
        }?;

        if let Some(msg) = self.message {
            write!(f, ": {}", msg)?;
        }

        if let Some(id) = self.context_id {
            write!(f, " (env: {:#010x})", id)?;
        }

        Ok(())
    }
}

impl From<ErrorCode> for ExoError {
    fn from(code: ErrorCode) -> Self {
        ExoError::new(code)
    }
}
