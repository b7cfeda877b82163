use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use super::TranscodeStage;

/// Runs encoder commands. Swapped out in tests so no real ffmpeg is needed.
#[async_trait]
pub trait TranscodeExecutor: Send + Sync {
    async fn run(&self, stage: TranscodeStage, command: &mut Command) -> std::io::Result<Output>;
}

#[derive(Debug, Default, Clone)]
pub struct SystemTranscodeExecutor;

#[async_trait]
impl TranscodeExecutor for SystemTranscodeExecutor {
    async fn run(&self, _stage: TranscodeStage, command: &mut Command) -> std::io::Result<Output> {
        command.kill_on_drop(true).output().await
    }
}
