//! Known platform commands and their typed payloads

use std::fmt;

use crate::error::CommandError;

/// Command ids understood by the platform (must match exactly)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    SystemReady = 1,
    BenchmarkReady = 2,
    TaskGeneratorStart = 8,
    BenchmarkFinished = 11,
    TaskGenerationFinished = 15,
    StartBenchmark = 17,
    LearningFinished = 101,
}

impl CommandId {
    pub const ALL: [CommandId; 7] = [
        CommandId::SystemReady,
        CommandId::BenchmarkReady,
        CommandId::TaskGeneratorStart,
        CommandId::BenchmarkFinished,
        CommandId::TaskGenerationFinished,
        CommandId::StartBenchmark,
        CommandId::LearningFinished,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandId::SystemReady => "SYSTEM_READY",
            CommandId::BenchmarkReady => "BENCHMARK_READY",
            CommandId::TaskGeneratorStart => "TASK_GENERATOR_START",
            CommandId::BenchmarkFinished => "BENCHMARK_FINISHED",
            CommandId::TaskGenerationFinished => "TASK_GENERATION_FINISHED",
            CommandId::StartBenchmark => "START_BENCHMARK",
            CommandId::LearningFinished => "LEARNING_FINISHED",
        }
    }
}

impl TryFrom<u8> for CommandId {
    type Error = CommandError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        CommandId::ALL
            .into_iter()
            .find(|c| c.as_u8() == id)
            .ok_or(CommandError::UnknownCommand(id))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}

/// A command with its payload decoded according to its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SystemReady,
    BenchmarkReady,
    TaskGeneratorStart,
    /// Carries the serialized result document
    BenchmarkFinished { result: String },
    TaskGenerationFinished,
    /// Carries the identifier of the system under test
    StartBenchmark { system_id: String },
    LearningFinished,
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Command::SystemReady => CommandId::SystemReady,
            Command::BenchmarkReady => CommandId::BenchmarkReady,
            Command::TaskGeneratorStart => CommandId::TaskGeneratorStart,
            Command::BenchmarkFinished { .. } => CommandId::BenchmarkFinished,
            Command::TaskGenerationFinished => CommandId::TaskGenerationFinished,
            Command::StartBenchmark { .. } => CommandId::StartBenchmark,
            Command::LearningFinished => CommandId::LearningFinished,
        }
    }

    /// Payload bytes as they go on the wire
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Command::BenchmarkFinished { result } => result.as_bytes().to_vec(),
            Command::StartBenchmark { system_id } => system_id.as_bytes().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Interpret a payload for the given command id
    ///
    /// Payload-less commands ignore whatever trailing bytes they carry.
    pub fn decode(id: CommandId, payload: &[u8]) -> Result<Self, CommandError> {
        let text = |command: &'static str| {
            String::from_utf8(payload.to_vec()).map_err(|e| CommandError::InvalidPayload {
                command,
                reason: e.to_string(),
            })
        };

        Ok(match id {
            CommandId::SystemReady => Command::SystemReady,
            CommandId::BenchmarkReady => Command::BenchmarkReady,
            CommandId::TaskGeneratorStart => Command::TaskGeneratorStart,
            CommandId::BenchmarkFinished => Command::BenchmarkFinished {
                result: text(id.name())?,
            },
            CommandId::TaskGenerationFinished => Command::TaskGenerationFinished,
            CommandId::StartBenchmark => Command::StartBenchmark {
                system_id: text(id.name())?,
            },
            CommandId::LearningFinished => Command::LearningFinished,
        })
    }
}
