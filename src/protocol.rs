//! Chat Protocol
//!
//! Line-oriented text protocol: client commands in, plain notices out.

use std::fmt;
use std::str::FromStr;

use crate::group::{self, GroupError};

pub const USERNAME_PROMPT: &str = "Enter username: ";
pub const PASSWORD_PROMPT: &str = "Enter password: ";

/// Commands a logged-in client may send, one per line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Broadcast { text: String },
    Private { target: String, text: String },
    CreateGroup { name: String },
    JoinGroup { name: String },
    GroupMessage { name: String, text: String },
    LeaveGroup { name: String },
    Exit,
}

/// Why a line could not be turned into a [`Command`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Message cannot be empty")]
    EmptyMessage,
    #[error("Invalid group name")]
    InvalidGroupName,
    #[error("Invalid command format")]
    InvalidFormat,
}

fn message_text(text: &str) -> Result<String, ParseError> {
    if text.trim().is_empty() {
        Err(ParseError::EmptyMessage)
    } else {
        Ok(text.to_string())
    }
}

fn group_name(name: &str) -> Result<String, ParseError> {
    group::validate_name(name).map_err(|_| ParseError::InvalidGroupName)?;
    Ok(name.to_string())
}

impl Command {
    /// Parse one line, already stripped of its line terminator
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (head, rest) = match line.split_once(' ') {
            Some((head, rest)) => (head, Some(rest)),
            None => (line, None),
        };

        match head {
            "/broadcast" => Ok(Command::Broadcast {
                text: message_text(rest.unwrap_or(""))?,
            }),
            "/msg" => {
                let rest = rest.ok_or(ParseError::InvalidFormat)?;
                let (target, text) = rest.split_once(' ').unwrap_or((rest, ""));
                if target.is_empty() {
                    return Err(ParseError::InvalidFormat);
                }
                Ok(Command::Private {
                    target: target.to_string(),
                    text: message_text(text)?,
                })
            }
            "/create_group" => Ok(Command::CreateGroup {
                name: group_name(rest.unwrap_or(""))?,
            }),
            "/join_group" => Ok(Command::JoinGroup {
                name: group_name(rest.unwrap_or(""))?,
            }),
            "/leave_group" => Ok(Command::LeaveGroup {
                name: group_name(rest.unwrap_or(""))?,
            }),
            "/group_msg" => {
                let rest = rest.ok_or(ParseError::InvalidFormat)?;
                let (name, text) = rest.split_once(' ').unwrap_or((rest, ""));
                Ok(Command::GroupMessage {
                    name: group_name(name)?,
                    text: message_text(text)?,
                })
            }
            "/exit" if rest.map_or(true, |r| r.trim().is_empty()) => Ok(Command::Exit),
            _ => Err(ParseError::InvalidFormat),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Server-to-client lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Welcome { username: String },
    AuthenticationFailed,
    AlreadyLoggedIn,
    UserJoined { username: String },
    UserLeft { username: String },
    Broadcast { from: String, text: String },
    Private { from: String, text: String },
    GroupMessage { group: String, from: String, text: String },
    GroupCreated { group: String },
    GroupJoined { group: String },
    GroupLeft { group: String },
    MemberJoinedGroup { group: String, username: String },
    MemberLeftGroup { group: String, username: String },
    GroupFailed { group: String, error: GroupError },
    UserUnknown { username: String },
    UserOffline { username: String },
    SelfMessage,
    Rejected(ParseError),
    LineTooLong { limit: usize },
    IdleTimeout,
    Goodbye,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Welcome { username } => {
                write!(f, "Welcome to the chat server, {}!", username)
            }
            Notice::AuthenticationFailed => write!(f, "Authentication failed."),
            Notice::AlreadyLoggedIn => write!(f, "Login rejected: user is already logged in."),
            Notice::UserJoined { username } => write!(f, "{} has joined the chat.", username),
            Notice::UserLeft { username } => write!(f, "{} has left the chat.", username),
            Notice::Broadcast { from, text } => write!(f, "[{}]: {}", from, text),
            Notice::Private { from, text } => write!(f, "[{}] (private): {}", from, text),
            Notice::GroupMessage { group, from, text } => {
                write!(f, "[Group {}] {}: {}", group, from, text)
            }
            Notice::GroupCreated { group } => write!(f, "Group {} created.", group),
            Notice::GroupJoined { group } => write!(f, "You joined group {}.", group),
            Notice::GroupLeft { group } => write!(f, "You left group {}.", group),
            Notice::MemberJoinedGroup { group, username } => {
                write!(f, "{} joined group {}.", username, group)
            }
            Notice::MemberLeftGroup { group, username } => {
                write!(f, "{} left group {}.", username, group)
            }
            Notice::GroupFailed { group, error } => match error {
                GroupError::InvalidName => write!(
                    f,
                    "Invalid group name: must be non-empty and contain no spaces."
                ),
                GroupError::AlreadyExists => write!(f, "Group {} already exists.", group),
                GroupError::NoSuchGroup => write!(f, "Group {} does not exist.", group),
                GroupError::AlreadyMember => {
                    write!(f, "You are already a member of group {}.", group)
                }
                GroupError::NotMember => write!(f, "You are not a member of group {}.", group),
            },
            Notice::UserUnknown { username } => write!(f, "User {} does not exist.", username),
            Notice::UserOffline { username } => write!(f, "User {} is not online.", username),
            Notice::SelfMessage => write!(f, "You cannot send a private message to yourself."),
            Notice::Rejected(ParseError::EmptyMessage) => write!(f, "Message cannot be empty."),
            Notice::Rejected(ParseError::InvalidGroupName) => write!(
                f,
                "Invalid group name: must be non-empty and contain no spaces."
            ),
            Notice::Rejected(ParseError::InvalidFormat) => write!(
                f,
                "Invalid command format. Use /broadcast, /msg, /create_group, \
                 /join_group, /group_msg, /leave_group or /exit."
            ),
            Notice::LineTooLong { limit } => {
                write!(f, "Line exceeds {} bytes, closing connection.", limit)
            }
            Notice::IdleTimeout => write!(f, "Idle timeout, closing connection."),
            Notice::Goodbye => write!(f, "Goodbye."),
        }
    }
}
