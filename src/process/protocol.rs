use crate::simulation::SimulationContext;
use crate::strategy::Strategy;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Command bytes broadcast by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Evaluate = b'E',
    Quit = b'Q',
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown command byte {0:#04x}")]
pub struct UnknownCommand(pub u8);

impl Command {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = UnknownCommand;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'E' => Ok(Command::Evaluate),
            b'Q' => Ok(Command::Quit),
            other => Err(UnknownCommand(other)),
        }
    }
}

/// Contiguous slice of the current generation handed to one worker.
#[derive(Debug, Clone)]
pub struct Shard {
    /// Index of the first strategy in the generation.
    pub offset: usize,
    pub strategies: Vec<Strategy>,
    pub best: Arc<Strategy>,
    pub context: SimulationContext,
}

/// Evaluated shard coming back from worker `rank`.
#[derive(Debug)]
pub struct ShardResult {
    pub rank: usize,
    pub offset: usize,
    pub strategies: Vec<Strategy>,
}

/// What travels down a worker's channel.
#[derive(Debug)]
pub enum Message {
    Evaluate {
        shard: Shard,
        reply: oneshot::Sender<ShardResult>,
    },
    Quit,
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Evaluate { .. } => Command::Evaluate,
            Message::Quit => Command::Quit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::Evaluate.as_byte(), b'E');
        assert_eq!(Command::Quit.as_byte(), b'Q');
        assert_eq!(Command::try_from(b'E'), Ok(Command::Evaluate));
        assert_eq!(Command::try_from(b'Q'), Ok(Command::Quit));
        assert_eq!(Command::try_from(b'X'), Err(UnknownCommand(b'X')));
    }

    #[test]
    fn test_message_command() {
        let (reply, _rx) = oneshot::channel();
        let message = Message::Evaluate {
            shard: Shard {
                offset: 0,
                strategies: Vec::new(),
                best: Arc::new(Strategy::default()),
                context: SimulationContext::default(),
            },
            reply,
        };
        assert_eq!(message.command(), Command::Evaluate);
        assert_eq!(Message::Quit.command(), Command::Quit);
    }
}
