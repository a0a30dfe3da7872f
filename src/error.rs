//! Application-wide error types.
//!
//! Turn-level failures (tools, model, output validation) never surface as
//! `AppError`; the dispatcher converts them into reply strings. `AppError`
//! covers startup and channel infrastructure only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("knowledge store error: {0}")]
    Knowledge(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().starts_with("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn knowledge_error_display() {
        let e = AppError::Knowledge("open chunks.db: locked".into());
        assert!(e.to_string().contains("knowledge store error"));
        assert!(e.to_string().contains("locked"));
    }

    #[test]
    fn comms_error_display() {
        let e = AppError::Comms("axum bind failed".into());
        assert!(e.to_string().contains("axum bind failed"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
