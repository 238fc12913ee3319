use libchannel::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid YAML file: {0}")]
    InvalidYaml(#[from] serde_yml::Error),
    #[error("Channel engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Scenario step {step} failed: {reason}")]
    Scenario { step: usize, reason: String },
}
