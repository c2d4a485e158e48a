//! Snapshot wire protocol.
//!
//! Requests are single text lines:
//!
//! ```text
//! snapshot;<verb>[;name:<snapshot-name>][;data:<hex>][;state:start|cont|done]
//! ```
//!
//! Responses are plain strings. Any response containing [`ERROR_SENTINEL`]
//! is a rejection; that check happens in [`Response::classify`], which is
//! the only way to get at the response payload.

use std::{fmt, num::IntErrorKind, str::FromStr};

use thiserror::Error;

use crate::error::SnapshotError;

/// Namespace word in front of every request on the monitor channel.
pub const NAMESPACE: &str = "snapshot";

/// Separator between request fields.
pub const FIELD_SEPARATOR: char = ';';

/// Separator between a field key and its value.
pub const KEY_SEPARATOR: char = ':';

/// Raw bytes per `load` chunk (2048 hex characters on the wire).
pub const CHUNK_SIZE: usize = 1024;

/// Marker the remote side embeds in every failure response.
pub const ERROR_SENTINEL: &str = "SNAPSHOT ERR";

/// Protocol verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Info,
    Create,
    Restore,
    Delete,
    Save,
    Load,
}

impl Verb {
    /// Wire spelling of the verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Create => "create",
            Self::Restore => "restore",
            Self::Delete => "delete",
            Self::Save => "save",
            Self::Load => "load",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = RequestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "create" => Ok(Self::Create),
            "restore" => Ok(Self::Restore),
            "delete" => Ok(Self::Delete),
            "save" => Ok(Self::Save),
            "load" => Ok(Self::Load),
            other => Err(RequestParseError::UnknownVerb(other.to_string())),
        }
    }
}

/// Phase of a chunked `load` upload, carried in the `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Start,
    Continuing,
    Done,
}

impl LoadPhase {
    /// Wire spelling of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Continuing => "cont",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadPhase {
    type Err = RequestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "cont" => Ok(Self::Continuing),
            "done" => Ok(Self::Done),
            other => Err(RequestParseError::InvalidState(other.to_string())),
        }
    }
}

/// Request parse error (remote side of the protocol).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestParseError {
    #[error("missing snapshot namespace")]
    MissingNamespace,
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("field without key separator: {0:?}")]
    MissingSeparator(String),
    #[error("unknown field {0:?}")]
    UnknownField(String),
    #[error("duplicate field {0:?}")]
    DuplicateField(String),
    #[error("invalid state {0:?}")]
    InvalidState(String),
    #[error("invalid hex payload: {0}")]
    InvalidData(#[from] hex::FromHexError),
}

/// One snapshot request.
///
/// Optional fields are omitted from the wire form when `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub verb: Verb,
    pub name: Option<String>,
    pub data: Option<Vec<u8>>,
    pub state: Option<LoadPhase>,
}

impl Request {
    const fn bare(verb: Verb) -> Self {
        Self {
            verb,
            name: None,
            data: None,
            state: None,
        }
    }

    fn named(verb: Verb, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::bare(verb)
        }
    }

    /// `info`
    #[must_use]
    pub const fn info() -> Self {
        Self::bare(Verb::Info)
    }

    /// `create[;name:<name>]`
    #[must_use]
    pub fn create(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            ..Self::bare(Verb::Create)
        }
    }

    /// `restore;name:<name>`
    #[must_use]
    pub fn restore(name: &str) -> Self {
        Self::named(Verb::Restore, name)
    }

    /// `delete;name:<name>`
    #[must_use]
    pub fn delete(name: &str) -> Self {
        Self::named(Verb::Delete, name)
    }

    /// `save;name:<name>`
    #[must_use]
    pub fn save(name: &str) -> Self {
        Self::named(Verb::Save, name)
    }

    /// `load;data:<hex>;state:start|cont`
    #[must_use]
    pub fn load_chunk(phase: LoadPhase, chunk: &[u8]) -> Self {
        Self {
            data: Some(chunk.to_vec()),
            state: Some(phase),
            ..Self::bare(Verb::Load)
        }
    }

    /// `load[;name:<name>];state:done`
    #[must_use]
    pub fn load_done(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            state: Some(LoadPhase::Done),
            ..Self::bare(Verb::Load)
        }
    }

    /// The full line handed to the command channel, namespace included.
    #[must_use]
    pub fn command_line(&self) -> String {
        format!("{NAMESPACE}{FIELD_SEPARATOR}{self}")
    }

    /// Parse a full command line as produced by [`Request::command_line`].
    ///
    /// # Errors
    /// Returns error if the line does not follow the request grammar.
    pub fn parse_command_line(line: &str) -> Result<Self, RequestParseError> {
        let rest = line
            .trim()
            .strip_prefix(NAMESPACE)
            .and_then(|rest| rest.strip_prefix(FIELD_SEPARATOR))
            .ok_or(RequestParseError::MissingNamespace)?;
        rest.parse()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb.as_str())?;
        if let Some(ref name) = self.name {
            write!(f, "{FIELD_SEPARATOR}name{KEY_SEPARATOR}{name}")?;
        }
        if let Some(ref data) = self.data {
            write!(f, "{FIELD_SEPARATOR}data{KEY_SEPARATOR}{}", hex::encode(data))?;
        }
        if let Some(state) = self.state {
            write!(f, "{FIELD_SEPARATOR}state{KEY_SEPARATOR}{state}")?;
        }
        Ok(())
    }
}

impl FromStr for Request {
    type Err = RequestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(FIELD_SEPARATOR);
        let verb: Verb = fields.next().unwrap_or_default().parse()?;
        let mut request = Self::bare(verb);

        for field in fields {
            let (key, value) = field
                .split_once(KEY_SEPARATOR)
                .ok_or_else(|| RequestParseError::MissingSeparator(field.to_string()))?;
            let duplicate = match key {
                "name" => request.name.replace(value.to_string()).is_some(),
                "data" => request.data.replace(hex::decode(value)?).is_some(),
                "state" => request.state.replace(value.parse()?).is_some(),
                other => return Err(RequestParseError::UnknownField(other.to_string())),
            };
            if duplicate {
                return Err(RequestParseError::DuplicateField(key.to_string()));
            }
        }

        Ok(request)
    }
}

/// Check that a caller-supplied name can travel inside a request.
///
/// # Errors
/// Returns [`SnapshotError::InvalidName`] for empty names and names containing
/// a field separator, key separator or line break.
pub fn validate_name(name: &str) -> Result<(), SnapshotError> {
    let breaks_grammar = |c: char| c == FIELD_SEPARATOR || c == KEY_SEPARATOR || c == '\n' || c == '\r';
    if name.is_empty() || name.contains(breaks_grammar) {
        return Err(SnapshotError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A response that has passed the error sentinel check.
#[derive(Debug, Clone, Copy)]
pub struct Response<'a> {
    verb: Verb,
    text: &'a str,
}

impl<'a> Response<'a> {
    /// Reject responses carrying the error sentinel.
    ///
    /// # Errors
    /// Returns [`SnapshotError::RemoteRejected`] if the sentinel is present.
    pub fn classify(verb: Verb, text: &'a str) -> Result<Self, SnapshotError> {
        if text.contains(ERROR_SENTINEL) {
            tracing::warn!(%verb, response = text.trim(), "Remote rejected request");
            return Err(SnapshotError::RemoteRejected {
                verb,
                response: text.trim().to_string(),
            });
        }
        Ok(Self { verb, text })
    }

    /// Verb this response answers.
    #[must_use]
    pub const fn verb(&self) -> Verb {
        self.verb
    }

    /// Raw response text.
    #[must_use]
    pub const fn text(&self) -> &'a str {
        self.text
    }

    /// Interpret the response as an echoed snapshot name.
    ///
    /// # Errors
    /// Returns error if the response is empty.
    pub fn name(&self) -> Result<&'a str, SnapshotError> {
        let name = self.text.trim();
        if name.is_empty() {
            return Err(SnapshotError::malformed(self.verb, "empty snapshot name"));
        }
        Ok(name)
    }

    /// Interpret the response as a signed decimal byte count.
    ///
    /// Counts outside the `i128` range saturate; they can never match a
    /// chunk length anyway.
    ///
    /// # Errors
    /// Returns error if the response is not a decimal number.
    pub fn ack(&self) -> Result<i128, SnapshotError> {
        let text = self.text.trim();
        match text.parse::<i128>() {
            Ok(count) => Ok(count),
            Err(e) => match e.kind() {
                IntErrorKind::PosOverflow => Ok(i128::MAX),
                IntErrorKind::NegOverflow => Ok(i128::MIN),
                _ => Err(SnapshotError::malformed(
                    self.verb,
                    format!("expected a byte count, got {text:?}"),
                )),
            },
        }
    }

    /// Interpret the response as a hex-encoded blob.
    ///
    /// # Errors
    /// Returns error if the response is not valid hex.
    pub fn blob(&self) -> Result<Vec<u8>, SnapshotError> {
        hex::decode(self.text.trim())
            .map_err(|e| SnapshotError::malformed(self.verb, format!("invalid hex payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_request_encoding() {
        assert_eq!(Request::info().to_string(), "info");
        assert_eq!(Request::create(None).to_string(), "create");
        assert_eq!(Request::create(Some("alpha")).to_string(), "create;name:alpha");
        assert_eq!(Request::restore("alpha").to_string(), "restore;name:alpha");
        assert_eq!(Request::delete("alpha").to_string(), "delete;name:alpha");
        assert_eq!(Request::save("alpha").to_string(), "save;name:alpha");
        assert_eq!(
            Request::load_chunk(LoadPhase::Start, &[0xde, 0xad, 0x0f]).to_string(),
            "load;data:dead0f;state:start"
        );
        assert_eq!(
            Request::load_chunk(LoadPhase::Continuing, &[]).to_string(),
            "load;data:;state:cont"
        );
        assert_eq!(Request::load_done(None).to_string(), "load;state:done");
        assert_eq!(
            Request::load_done(Some("beta")).to_string(),
            "load;name:beta;state:done"
        );
    }

    #[test]
    fn test_command_line_has_namespace() {
        assert_eq!(Request::info().command_line(), "snapshot;info");
        assert_eq!(
            Request::restore("alpha").command_line(),
            "snapshot;restore;name:alpha"
        );
    }

    #[test]
    fn test_parse_command_line() {
        let request = Request::parse_command_line("snapshot;load;data:00ff;state:cont").unwrap();
        assert_eq!(request, Request::load_chunk(LoadPhase::Continuing, &[0x00, 0xff]));

        let request = Request::parse_command_line("snapshot;load;state:done;name:x").unwrap();
        assert_eq!(request, Request::load_done(Some("x")));
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert_eq!(
            Request::parse_command_line("info"),
            Err(RequestParseError::MissingNamespace)
        );
        assert_eq!(
            Request::parse_command_line("snapshot;frobnicate"),
            Err(RequestParseError::UnknownVerb("frobnicate".into()))
        );
        assert_eq!(
            Request::parse_command_line("snapshot;save;alpha"),
            Err(RequestParseError::MissingSeparator("alpha".into()))
        );
        assert_eq!(
            Request::parse_command_line("snapshot;save;name:a;name:b"),
            Err(RequestParseError::DuplicateField("name".into()))
        );
        assert_eq!(
            Request::parse_command_line("snapshot;load;state:later"),
            Err(RequestParseError::InvalidState("later".into()))
        );
        assert!(matches!(
            Request::parse_command_line("snapshot;load;data:zz;state:start"),
            Err(RequestParseError::InvalidData(_))
        ));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("alpha").is_ok());
        assert!(validate_name("with space").is_ok());
        for bad in ["", "a;b", "a:b", "a\nb"] {
            assert_eq!(validate_name(bad).unwrap_err().kind(), ErrorKind::InvalidName);
        }
    }

    #[test]
    fn test_sentinel_checked_first() {
        let err = Response::classify(Verb::Save, "SNAPSHOT ERR: no such snapshot").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteRejected);

        // A sentinel anywhere in the text counts, even surrounded by hex.
        let err = Response::classify(Verb::Save, "00ffSNAPSHOT ERR").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    }

    #[test]
    fn test_response_interpretation() {
        let resp = Response::classify(Verb::Load, " 1024\n").unwrap();
        assert_eq!(resp.ack().unwrap(), 1024);

        let resp = Response::classify(Verb::Load, "-1").unwrap();
        assert_eq!(resp.ack().unwrap(), -1);

        let resp = Response::classify(Verb::Load, "-99999999999999999999999999999999999999999").unwrap();
        assert_eq!(resp.ack().unwrap(), i128::MIN);

        let resp = Response::classify(Verb::Load, "ok").unwrap();
        assert_eq!(resp.ack().unwrap_err().kind(), ErrorKind::MalformedResponse);

        let resp = Response::classify(Verb::Load, "").unwrap();
        assert_eq!(resp.ack().unwrap_err().kind(), ErrorKind::MalformedResponse);

        let resp = Response::classify(Verb::Create, "alpha\n").unwrap();
        assert_eq!(resp.name().unwrap(), "alpha");

        let resp = Response::classify(Verb::Create, "  ").unwrap();
        assert_eq!(resp.name().unwrap_err().kind(), ErrorKind::MalformedResponse);

        let resp = Response::classify(Verb::Save, "DEADbeef").unwrap();
        assert_eq!(resp.blob().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);

        let resp = Response::classify(Verb::Save, "abc").unwrap();
        assert_eq!(resp.blob().unwrap_err().kind(), ErrorKind::MalformedResponse);
    }
}
