//! Wire opcodes.
//!
//! See <https://www.mongodb.com/docs/manual/legacy-opcodes/>.

use serde::{Serialize, Serializer};
use std::fmt;

pub const OP_REPLY: u32 = 1;
pub const OP_UPDATE: u32 = 2001;
pub const OP_INSERT: u32 = 2002;
pub const OP_RESERVED: u32 = 2003;
pub const OP_QUERY: u32 = 2004;
pub const OP_GET_MORE: u32 = 2005;
pub const OP_DELETE: u32 = 2006;
pub const OP_KILL_CURSORS: u32 = 2007;
pub const OP_COMMAND: u32 = 2010;
pub const OP_COMMAND_REPLY: u32 = 2011;
pub const OP_COMPRESSED: u32 = 2012;
pub const OP_MSG: u32 = 2013;

/// Message kind carried in the header.
///
/// Every `u32` maps to some variant; values outside the catalogue are kept
/// as [`OpCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Reply,
    Update,
    Insert,
    Reserved,
    Query,
    GetMore,
    Delete,
    KillCursors,
    Command,
    CommandReply,
    Compressed,
    Msg,
    Unknown(u32),
}

impl OpCode {
    /// Numeric value as it appears on the wire.
    pub fn code(&self) -> u32 {
        match self {
            OpCode::Reply => OP_REPLY,
            OpCode::Update => OP_UPDATE,
            OpCode::Insert => OP_INSERT,
            OpCode::Reserved => OP_RESERVED,
            OpCode::Query => OP_QUERY,
            OpCode::GetMore => OP_GET_MORE,
            OpCode::Delete => OP_DELETE,
            OpCode::KillCursors => OP_KILL_CURSORS,
            OpCode::Command => OP_COMMAND,
            OpCode::CommandReply => OP_COMMAND_REPLY,
            OpCode::Compressed => OP_COMPRESSED,
            OpCode::Msg => OP_MSG,
            OpCode::Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Reply => "OP_REPLY",
            OpCode::Update => "OP_UPDATE",
            OpCode::Insert => "OP_INSERT",
            OpCode::Reserved => "RESERVED",
            OpCode::Query => "OP_QUERY",
            OpCode::GetMore => "OP_GET_MORE",
            OpCode::Delete => "OP_DELETE",
            OpCode::KillCursors => "OP_KILL_CURSORS",
            OpCode::Command => "OP_COMMAND",
            OpCode::CommandReply => "OP_COMMANDREPLY",
            OpCode::Compressed => "OP_COMPRESSED",
            OpCode::Msg => "OP_MSG",
            OpCode::Unknown(_) => "UNKNOWN",
        }
    }
}

impl From<u32> for OpCode {
    fn from(code: u32) -> Self {
        match code {
            OP_REPLY => OpCode::Reply,
            OP_UPDATE => OpCode::Update,
            OP_INSERT => OpCode::Insert,
            OP_RESERVED => OpCode::Reserved,
            OP_QUERY => OpCode::Query,
            OP_GET_MORE => OpCode::GetMore,
            OP_DELETE => OpCode::Delete,
            OP_KILL_CURSORS => OpCode::KillCursors,
            OP_COMMAND => OpCode::Command,
            OP_COMMAND_REPLY => OpCode::CommandReply,
            OP_COMPRESSED => OpCode::Compressed,
            OP_MSG => OpCode::Msg,
            other => OpCode::Unknown(other),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Unknown(code) => write!(f, "UNKNOWN({})", code),
            known => write!(f, "{}", known.name()),
        }
    }
}

impl Serialize for OpCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}
