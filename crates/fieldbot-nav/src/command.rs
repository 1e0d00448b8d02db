//! Robot command set and its `action(parameter)` wire form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDirection {
    Left,
    Right,
}

impl TurnDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// One discrete instruction for the robot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Turn in place; `degrees` is a non-negative magnitude.
    Turn {
        direction: TurnDirection,
        degrees: f64,
    },
    /// Drive straight; negative values reverse.
    Drive { mm: f64 },
    OpenGate,
    CloseGate,
    PushOut,
    PushReturn,
    Stop,
}

impl Command {
    pub fn turn(direction: TurnDirection, degrees: f64) -> Self {
        Self::Turn { direction, degrees }
    }

    pub fn drive(mm: f64) -> Self {
        Self::Drive { mm }
    }

    pub fn is_turn(&self) -> bool {
        matches!(self, Self::Turn { .. })
    }

    /// Action name used on the wire.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Turn {
                direction: TurnDirection::Left,
                ..
            } => "turn_left_deg",
            Self::Turn {
                direction: TurnDirection::Right,
                ..
            } => "turn_right_deg",
            Self::Drive { .. } => "drive_straight_mm",
            Self::OpenGate => "open_gate",
            Self::CloseGate => "close_gate",
            Self::PushOut => "push_out",
            Self::PushReturn => "push_return",
            Self::Stop => "stop",
        }
    }
}

fn round1(v: f64) -> f64 {
    let r = (v * 10.0).round() / 10.0;
    // avoid printing "-0"
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Turn { degrees, .. } => write!(f, "{}({})", self.action(), round1(degrees)),
            Self::Drive { mm } => write!(f, "{}({})", self.action(), round1(mm)),
            _ => write!(f, "{}()", self.action()),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("expected `action(parameter)`, got {token:?}")]
    Syntax { token: String },
    #[error("unknown action {name:?}")]
    UnknownAction { name: String },
    #[error("action {name} needs a numeric parameter, got {arg:?}")]
    BadArgument { name: String, arg: String },
    #[error("action {name} takes no parameter, got {arg:?}")]
    UnexpectedArgument { name: String, arg: String },
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let syntax = || CommandParseError::Syntax {
            token: token.to_string(),
        };
        let (name, rest) = token.split_once('(').ok_or_else(syntax)?;
        let arg = rest.strip_suffix(')').ok_or_else(syntax)?.trim();
        let name = name.trim();

        let number = || {
            arg.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| CommandParseError::BadArgument {
                    name: name.to_string(),
                    arg: arg.to_string(),
                })
        };
        let bare = |cmd: Command| {
            if arg.is_empty() {
                Ok(cmd)
            } else {
                Err(CommandParseError::UnexpectedArgument {
                    name: name.to_string(),
                    arg: arg.to_string(),
                })
            }
        };

        match name {
            "turn_left_deg" => Ok(Command::turn(TurnDirection::Left, number()?)),
            "turn_right_deg" => Ok(Command::turn(TurnDirection::Right, number()?)),
            "drive_straight_mm" => Ok(Command::drive(number()?)),
            "open_gate" => bare(Command::OpenGate),
            "close_gate" => bare(Command::CloseGate),
            "push_out" => bare(Command::PushOut),
            "push_return" => bare(Command::PushReturn),
            "stop" => bare(Command::Stop),
            _ => Err(CommandParseError::UnknownAction {
                name: name.to_string(),
            }),
        }
    }
}
