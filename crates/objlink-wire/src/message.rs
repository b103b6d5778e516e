use std::io::{Read, Write};

use crate::codec::{WireReader, WireWriter};
use crate::error::{Result, WireError};
use crate::value::{Handle, Value};

/// The newest protocol version this build speaks.
pub const PROTOCOL_VERSION_CURRENT: i32 = 3;

/// The oldest protocol version this build still accepts.
pub const PROTOCOL_VERSION_OLDEST: i32 = 2;

/// One-byte message type tags.
///
/// Tags are assigned explicitly rather than relying on enum ordering so both
/// endpoints stay in sync across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0,
    VersionSelected = 1,
    LoadModule = 2,
    Invoke = 3,
    InvokeSpecial = 4,
    Return = 5,
    Free = 6,
    LoadScript = 7,
    Quit = 8,
    FatalError = 9,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => MessageType::Handshake,
            1 => MessageType::VersionSelected,
            2 => MessageType::LoadModule,
            3 => MessageType::Invoke,
            4 => MessageType::InvokeSpecial,
            5 => MessageType::Return,
            6 => MessageType::Free,
            7 => MessageType::LoadScript,
            8 => MessageType::Quit,
            9 => MessageType::FatalError,
            other => return Err(WireError::InvalidMessageType(other)),
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// The request sent by the remote runtime once: which module to attach and
/// where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequest {
    pub url: String,
    pub session_key: String,
    pub module_id: String,
    pub user_agent: String,
}

/// Every message that can appear on the channel.
///
/// Each message has a fixed field order; `send` writes the type tag then the
/// fields and flushes, `receive` reads the fields for a tag the dispatch loop
/// already consumed.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Proposed version range plus a free-form client descriptor, sent by the
    /// remote runtime as its first message.
    Handshake {
        min_version: i32,
        max_version: i32,
        client_descriptor: String,
    },
    /// The host's answer: a version inside the proposed range.
    VersionSelected { version: i32 },
    /// One-time module/session announcement after version selection.
    LoadModule(ModuleRequest),
    /// Call a method on an object the receiver exposes. A `Null` target
    /// addresses the receiver's root object.
    Invoke {
        method: String,
        target: Value,
        args: Vec<Value>,
    },
    /// Call a pre-registered numeric dispatch entry on the receiver.
    InvokeSpecial { dispatch_id: u8, args: Vec<Value> },
    /// Result of an Invoke, InvokeSpecial, or LoadModule.
    Return { is_exception: bool, value: Value },
    /// The sender has retired these handles from its own table; the receiver
    /// drops any bookkeeping it kept for them. No reply; sent only
    /// immediately before an Invoke or Return.
    Free { handles: Vec<Handle> },
    /// Source text handed to the receiver's script-loading collaborator.
    /// No reply; sent only immediately before an Invoke or Return.
    LoadScript { source: String },
    /// Orderly shutdown of the session. No reply.
    Quit,
    /// Abnormal termination, e.g. a failed version negotiation.
    FatalError { message: String },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Handshake { .. } => MessageType::Handshake,
            Message::VersionSelected { .. } => MessageType::VersionSelected,
            Message::LoadModule(_) => MessageType::LoadModule,
            Message::Invoke { .. } => MessageType::Invoke,
            Message::InvokeSpecial { .. } => MessageType::InvokeSpecial,
            Message::Return { .. } => MessageType::Return,
            Message::Free { .. } => MessageType::Free,
            Message::LoadScript { .. } => MessageType::LoadScript,
            Message::Quit => MessageType::Quit,
            Message::FatalError { .. } => MessageType::FatalError,
        }
    }

    /// Serialize and flush this message.
    pub fn send<W: Write>(&self, writer: &mut WireWriter<W>) -> Result<()> {
        writer.write_u8(self.message_type().tag());
        match self {
            Message::Handshake {
                min_version,
                max_version,
                client_descriptor,
            } => {
                writer.write_i32(*min_version);
                writer.write_i32(*max_version);
                writer.write_string(client_descriptor)?;
            }
            Message::VersionSelected { version } => writer.write_i32(*version),
            Message::LoadModule(req) => {
                writer.write_string(&req.url)?;
                writer.write_string(&req.session_key)?;
                writer.write_string(&req.module_id)?;
                writer.write_string(&req.user_agent)?;
            }
            Message::Invoke {
                method,
                target,
                args,
            } => {
                writer.write_string(method)?;
                target.encode(writer)?;
                writer.write_batch_len(args.len())?;
                for arg in args {
                    arg.encode(writer)?;
                }
            }
            Message::InvokeSpecial { dispatch_id, args } => {
                writer.write_u8(*dispatch_id);
                writer.write_batch_len(args.len())?;
                for arg in args {
                    arg.encode(writer)?;
                }
            }
            Message::Return {
                is_exception,
                value,
            } => {
                writer.write_bool(*is_exception);
                value.encode(writer)?;
            }
            Message::Free { handles } => {
                writer.write_batch_len(handles.len())?;
                for handle in handles {
                    writer.write_u32(*handle);
                }
            }
            Message::LoadScript { source } => writer.write_string(source)?,
            Message::Quit => {}
            Message::FatalError { message } => writer.write_string(message)?,
        }
        writer.flush()
    }

    /// Deserialize the body of a message whose type tag was already read.
    pub fn receive<R: Read>(message_type: MessageType, reader: &mut WireReader<R>) -> Result<Self> {
        Ok(match message_type {
            MessageType::Handshake => Message::Handshake {
                min_version: reader.read_i32()?,
                max_version: reader.read_i32()?,
                client_descriptor: reader.read_string()?,
            },
            MessageType::VersionSelected => Message::VersionSelected {
                version: reader.read_i32()?,
            },
            MessageType::LoadModule => Message::LoadModule(ModuleRequest {
                url: reader.read_string()?,
                session_key: reader.read_string()?,
                module_id: reader.read_string()?,
                user_agent: reader.read_string()?,
            }),
            MessageType::Invoke => {
                let method = reader.read_string()?;
                let target = Value::decode(reader)?;
                let argc = reader.read_batch_len()?;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(Value::decode(reader)?);
                }
                Message::Invoke {
                    method,
                    target,
                    args,
                }
            }
            MessageType::InvokeSpecial => {
                let dispatch_id = reader.read_u8()?;
                let argc = reader.read_batch_len()?;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(Value::decode(reader)?);
                }
                Message::InvokeSpecial { dispatch_id, args }
            }
            MessageType::Return => Message::Return {
                is_exception: reader.read_bool()?,
                value: Value::decode(reader)?,
            },
            MessageType::Free => {
                let count = reader.read_batch_len()?;
                let mut handles = Vec::with_capacity(count);
                for _ in 0..count {
                    handles.push(reader.read_u32()?);
                }
                Message::Free { handles }
            }
            MessageType::LoadScript => Message::LoadScript {
                source: reader.read_string()?,
            },
            MessageType::Quit => Message::Quit,
            MessageType::FatalError => Message::FatalError {
                message: reader.read_string()?,
            },
        })
    }

    /// Read the type tag then the body.
    pub fn read_from<R: Read>(reader: &mut WireReader<R>) -> Result<Self> {
        let message_type = MessageType::from_tag(reader.read_u8()?)?;
        Self::receive(message_type, reader)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::value::{ObjectRef, Origin};

    use super::*;

    fn roundtrip(msg: &Message) -> Message {
        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        msg.send(&mut writer).unwrap();
        let mut reader = WireReader::new(Cursor::new(writer.into_inner().into_inner()));
        Message::read_from(&mut reader).unwrap()
    }

    #[test]
    fn every_message_roundtrips() {
        let messages = [
            Message::Handshake {
                min_version: 2,
                max_version: 3,
                client_descriptor: "demo-client/0.1".to_string(),
            },
            Message::VersionSelected { version: 3 },
            Message::LoadModule(ModuleRequest {
                url: "http://localhost:8080/app".to_string(),
                session_key: "sess-abc".to_string(),
                module_id: "demo".to_string(),
                user_agent: "cli/0.1".to_string(),
            }),
            Message::Invoke {
                method: "add".to_string(),
                target: Value::Object(ObjectRef::new(Origin::Host, 7)),
                args: vec![Value::Int(2), Value::Int(3)],
            },
            Message::Invoke {
                method: "noArgs".to_string(),
                target: Value::Null,
                args: vec![],
            },
            Message::InvokeSpecial {
                dispatch_id: 2,
                args: vec![Value::Int(0), Value::Int(4)],
            },
            Message::Return {
                is_exception: false,
                value: Value::Int(5),
            },
            Message::Return {
                is_exception: true,
                value: Value::Str("boom".to_string()),
            },
            Message::Free {
                handles: vec![1, 2, 9],
            },
            Message::LoadScript {
                source: "function(){}".to_string(),
            },
            Message::Quit,
            Message::FatalError {
                message: "protocol version mismatch".to_string(),
            },
        ];
        for msg in &messages {
            assert_eq!(&roundtrip(msg), msg, "roundtrip failed for {msg:?}");
        }
    }

    #[test]
    fn first_byte_is_the_type_tag() {
        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        Message::Quit.send(&mut writer).unwrap();
        assert_eq!(writer.into_inner().into_inner(), vec![8]);
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let mut reader = WireReader::new(Cursor::new(vec![0x7F]));
        assert!(matches!(
            Message::read_from(&mut reader).unwrap_err(),
            WireError::InvalidMessageType(0x7F)
        ));
    }

    #[test]
    fn truncated_message_is_connection_closed() {
        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        Message::Invoke {
            method: "add".to_string(),
            target: Value::Null,
            args: vec![Value::Int(1)],
        }
        .send(&mut writer)
        .unwrap();
        let mut bytes = writer.into_inner().into_inner();
        bytes.truncate(bytes.len() - 2);

        let mut reader = WireReader::new(Cursor::new(bytes));
        assert!(matches!(
            Message::read_from(&mut reader).unwrap_err(),
            WireError::ConnectionClosed
        ));
    }

    #[test]
    fn oversized_free_batch_rejected() {
        let cfg = crate::codec::WireConfig {
            max_batch_len: 2,
            ..Default::default()
        };
        // FREE tag + count 3.
        let mut reader = WireReader::with_config(Cursor::new(vec![6, 0, 0, 0, 3]), cfg);
        assert!(matches!(
            Message::read_from(&mut reader).unwrap_err(),
            WireError::BatchTooLarge { len: 3, .. }
        ));
    }

    #[test]
    fn back_to_back_messages_decode_in_order() {
        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        Message::Free { handles: vec![4] }.send(&mut writer).unwrap();
        Message::Return {
            is_exception: false,
            value: Value::Undefined,
        }
        .send(&mut writer)
        .unwrap();

        let mut reader = WireReader::new(Cursor::new(writer.into_inner().into_inner()));
        assert!(matches!(
            Message::read_from(&mut reader).unwrap(),
            Message::Free { .. }
        ));
        assert!(matches!(
            Message::read_from(&mut reader).unwrap(),
            Message::Return { .. }
        ));
    }
}
