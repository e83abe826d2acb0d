// ABOUTME: The RESP reply type, a tagged sum shared by the framer, router, and session engine
// ABOUTME: Redirection is modeled as distinct variants, never recovered by string matching at call sites

use bytes::Bytes;

/// A single parsed RESP value.
///
/// `Error` carries a further breakdown so the router can detect `MOVED`/`ASK`
/// by matching on a variant instead of re-parsing the error text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Status(Bytes),
    Error(RespError),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Reply>>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RespError {
    /// Slot permanently reassigned to `addr`.
    Moved { slot: i64, addr: String },
    /// Slot migrating to `addr`; the next request must be preceded by `ASKING`.
    Ask { slot: i64, addr: String },
    /// Any other error line, verbatim minus the leading `-`.
    Generic(String),
}

impl RespError {
    pub fn message(&self) -> String {
        match self {
            RespError::Moved { slot, addr } => format!("MOVED {slot} {addr}"),
            RespError::Ask { slot, addr } => format!("ASK {slot} {addr}"),
            RespError::Generic(msg) => msg.clone(),
        }
    }
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Status(OK_BYTES.clone())
    }

    pub fn pong() -> Reply {
        Reply::Status(PONG_BYTES.clone())
    }

    /// Status replies reuse one shared allocation for the two byte strings
    /// the source actually sees on the wire: `OK` and `PONG`.
    pub fn status(bytes: Bytes) -> Reply {
        if bytes.as_ref() == OK_BYTES.as_ref() {
            Reply::Status(OK_BYTES.clone())
        } else if bytes.as_ref() == PONG_BYTES.as_ref() {
            Reply::Status(PONG_BYTES.clone())
        } else {
            Reply::Status(bytes)
        }
    }
}

static OK_BYTES: Bytes = Bytes::from_static(b"OK");
static PONG_BYTES: Bytes = Bytes::from_static(b"PONG");

/// Parses the payload of a `-` error line into a [`RespError`].
///
/// Splits on runs of spaces into up to four tokens; only the exact shapes
/// `MOVED <slot> <addr>` and `ASK <slot> <addr>` are recognized as redirects.
pub fn parse_error_line(payload: &str) -> RespError {
    let tokens: Vec<&str> = payload.split_whitespace().take(4).collect();

    if tokens.len() == 3 {
        if let Ok(slot) = tokens[1].parse::<i64>() {
            match tokens[0] {
                "MOVED" => {
                    return RespError::Moved {
                        slot,
                        addr: tokens[2].to_string(),
                    };
                }
                "ASK" => {
                    return RespError::Ask {
                        slot,
                        addr: tokens[2].to_string(),
                    };
                }
                _ => {}
            }
        }
    }

    RespError::Generic(payload.to_string())
}
