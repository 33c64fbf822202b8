//! Resource layout for the bundled recognition server
//!
//! Everything the server needs sits under one resource root:
//!
//! ```text
//! <root>/binaries/<os>/sherpa-onnx-online-websocket-server           (unix)
//! <root>/binaries/windows/<arch>/sherpa-onnx-online-websocket-server.exe
//!
//! <root>/models/tokens.txt
//! <root>/models/{encoder,decoder,joiner}-epoch-99-avg-1.onnx
//! <root>/models/log.txt                                      (written by the server)
//! ```
//!
//! A packaged install points the root at the platform resource directory;
//! a development tree uses `./resources`. The copy step that populates the
//! root happens at packaging time, not here.

use std::path::{Path, PathBuf};

use super::SupervisorError;

/// Name of the recognition server executable (without platform suffix).
pub const SERVER_BINARY_NAME: &str = "sherpa-onnx-online-websocket-server";

const BINARIES_DIR: &str = "binaries";
const MODELS_DIR: &str = "models";

const TOKENS_FILE: &str = "tokens.txt";
const ENCODER_FILE: &str = "encoder-epoch-99-avg-1.onnx";
const DECODER_FILE: &str = "decoder-epoch-99-avg-1.onnx";
const JOINER_FILE: &str = "joiner-epoch-99-avg-1.onnx";
const LOG_FILE: &str = "log.txt";

/// Resolved model artifact paths handed to the server on its command line.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub tokens: PathBuf,
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub joiner: PathBuf,
    pub log_file: PathBuf,
}

/// Root-relative resolution of the server binary and model artifacts.
#[derive(Debug, Clone)]
pub struct ResourceLayout {
    root: PathBuf,
}

impl ResourceLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Development-tree layout: `resources/` under the working directory.
    pub fn dev_default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(cwd.join("resources"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Platform-specific path of the server executable.
    #[cfg(not(windows))]
    pub fn binary_path(&self) -> PathBuf {
        self.root
            .join(BINARIES_DIR)
            .join(std::env::consts::OS)
            .join(SERVER_BINARY_NAME)
    }

    /// Platform-specific path of the server executable.
    #[cfg(windows)]
    pub fn binary_path(&self) -> PathBuf {
        self.root
            .join(BINARIES_DIR)
            .join("windows")
            .join(std::env::consts::ARCH)
            .join(format!("{}.exe", SERVER_BINARY_NAME))
    }

    pub fn model_paths(&self) -> ModelPaths {
        let models = self.root.join(MODELS_DIR);
        ModelPaths {
            tokens: models.join(TOKENS_FILE),
            encoder: models.join(ENCODER_FILE),
            decoder: models.join(DECODER_FILE),
            joiner: models.join(JOINER_FILE),
            log_file: models.join(LOG_FILE),
        }
    }

    /// Verify the binary and all four model artifacts exist. The server's own
    /// log file is created by the server and is not required up front.
    pub fn check(&self) -> Result<(), SupervisorError> {
        let binary = self.binary_path();
        if !binary.exists() {
            return Err(SupervisorError::MissingBinary(binary));
        }

        let models = self.model_paths();
        for file in [&models.tokens, &models.encoder, &models.decoder, &models.joiner] {
            if !file.exists() {
                return Err(SupervisorError::MissingModel(file.clone()));
            }
        }

        Ok(())
    }
}
