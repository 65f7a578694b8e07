use shared::rsa::RsaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RSA error: {0}")]
    Rsa(#[from] RsaError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("login block needs {0} bytes, more than one RSA block")]
    LoginTooLarge(usize),
    #[error("connection closed by server")]
    Closed,
}
