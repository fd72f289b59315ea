//! Wire envelope between an engine client and its host.
//!
//! Outbound: `{"cmd": "<name>", ...parameters}`.
//! Inbound: `{"cmd": "<same name>", "result": "ok" | "failed", ...fields}`.
//! Binary payloads travel as base64 strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-category lookup maps the host keeps between compiles
/// (e.g. `"texlive-found" -> {"article.cls" -> "/tex/article.cls"}`).
pub type CacheData = BTreeMap<String, BTreeMap<String, String>>;

/// Name of the handshake the host emits once it is ready.
pub const LOAD: &str = "load";

/// Commands understood by an engine host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum Command {
    /// Typeset the main file into the intermediate format.
    Compile,
    /// Typeset the main file into the final artifact.
    CompileToFinalFormat,
    /// Dump a format file from the main file.
    CompileFormatData,
    /// Write a file into the working area.
    WriteMemoryFile {
        path: String,
        #[serde(with = "b64")]
        data: Vec<u8>,
    },
    /// Write a package/support file into the support area.
    WriteSupportFile {
        path: String,
        #[serde(with = "b64")]
        data: Vec<u8>,
    },
    RemoveMemoryFile { path: String },
    MakeDirectory { path: String },
    /// Read a file back out of the working or support area.
    FetchFile { path: String },
    FetchCacheData,
    WriteCacheData { cache: CacheData },
    SetNetworkEndpoint { url: String },
    SetMainFile { path: String },
    /// Rebuild the whole filesystem and forget lookup caches.
    FlushFullCache,
    /// Empty the working area.
    FlushWorkingArea,
    GracefulClose,
}

/// Wire names of every command, plus the host handshake.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum CommandName {
    Load,
    Compile,
    CompileToFinalFormat,
    CompileFormatData,
    WriteMemoryFile,
    WriteSupportFile,
    RemoveMemoryFile,
    MakeDirectory,
    FetchFile,
    FetchCacheData,
    WriteCacheData,
    SetNetworkEndpoint,
    SetMainFile,
    FlushFullCache,
    FlushWorkingArea,
    GracefulClose,
}

impl CommandName {
    /// Compile-class commands report render failure through a status code
    /// rather than failing the channel.
    pub fn is_compile(self) -> bool {
        matches!(
            self,
            CommandName::Compile | CommandName::CompileToFinalFormat | CommandName::CompileFormatData
        )
    }
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Command::Compile => CommandName::Compile,
            Command::CompileToFinalFormat => CommandName::CompileToFinalFormat,
            Command::CompileFormatData => CommandName::CompileFormatData,
            Command::WriteMemoryFile { .. } => CommandName::WriteMemoryFile,
            Command::WriteSupportFile { .. } => CommandName::WriteSupportFile,
            Command::RemoveMemoryFile { .. } => CommandName::RemoveMemoryFile,
            Command::MakeDirectory { .. } => CommandName::MakeDirectory,
            Command::FetchFile { .. } => CommandName::FetchFile,
            Command::FetchCacheData => CommandName::FetchCacheData,
            Command::WriteCacheData { .. } => CommandName::WriteCacheData,
            Command::SetNetworkEndpoint { .. } => CommandName::SetNetworkEndpoint,
            Command::SetMainFile { .. } => CommandName::SetMainFile,
            Command::FlushFullCache => CommandName::FlushFullCache,
            Command::FlushWorkingArea => CommandName::FlushWorkingArea,
            Command::GracefulClose => CommandName::GracefulClose,
        }
    }
}

/// `result` field of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Ok,
    Failed,
}

/// Flat response envelope. Which optional fields are present depends on
/// the command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub cmd: String,
    pub result: Outcome,
    /// Exit status of a compile-class command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// Binary payload (compiled artifact, fetched file).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub data: Option<Vec<u8>>,
    /// Working-area path of `data`, when it came from a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(cmd: impl AsRef<str>) -> Self {
        Self {
            cmd: cmd.as_ref().to_string(),
            ..Default::default()
        }
    }

    pub fn failed(cmd: impl AsRef<str>, error: impl Into<String>) -> Self {
        Self {
            cmd: cmd.as_ref().to_string(),
            result: Outcome::Failed,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// The handshake a host sends before accepting commands.
    pub fn load() -> Self {
        Self::ok(LOAD)
    }

    /// Compile-class response; `result` follows the status.
    pub fn compiled(cmd: CommandName, output: CompileOutput) -> Self {
        Self {
            cmd: cmd.to_string(),
            result: if output.status == 0 {
                Outcome::Ok
            } else {
                Outcome::Failed
            },
            status: Some(output.status),
            log: Some(output.log),
            data: output.data,
            path: output.path,
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_cache(mut self, cache: CacheData) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.result == Outcome::Ok
    }

    /// Extract the compile fields. A response without a status (host-level
    /// failure) maps to status -1.
    pub fn into_compile_output(self) -> CompileOutput {
        CompileOutput {
            status: self.status.unwrap_or(-1),
            log: self.log.or(self.error).unwrap_or_default(),
            data: self.data,
            path: self.path,
        }
    }
}

/// Result of a compile-class command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    /// Zero on success.
    pub status: i32,
    pub log: String,
    pub data: Option<Vec<u8>>,
    /// Working-area file the data was read from.
    pub path: Option<String>,
}

impl CompileOutput {
    pub fn succeeded(&self) -> bool {
        self.status == 0
    }
}

/// Encode one message as a single JSON line (no trailing newline).
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

/// Parse a command line from a client.
///
/// On failure the error is a ready-made failure response echoing whatever
/// `cmd` could be recovered, so unknown commands get a well-formed reply.
pub fn decode_command(line: &str) -> Result<Command, Response> {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => Ok(command),
        Err(err) => {
            let cmd = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|value| value.get("cmd")?.as_str().map(str::to_string))
                .unwrap_or_default();
            let known = cmd.parse::<CommandName>().is_ok();
            let message = if known || cmd.is_empty() {
                format!("malformed request: {}", err)
            } else {
                format!("unknown command: {}", cmd)
            };
            Err(Response::failed(cmd, message))
        }
    }
}

mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded.as_bytes()))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[test]
    fn test_command_wire_shape() {
        let cmd = Command::WriteMemoryFile {
            path: "main.tex".into(),
            data: b"hi".to_vec(),
        };
        let value = serde_json::to_value(&cmd).expect("serialize");
        assert_eq!(
            value,
            json!({"cmd": "write-memory-file", "path": "main.tex", "data": "aGk="})
        );
        assert_eq!(
            serde_json::to_value(Command::CompileToFinalFormat).expect("serialize"),
            json!({"cmd": "compile-to-final-format"})
        );
    }

    #[test]
    fn test_names_match_serde_tags() {
        let samples = [
            Command::Compile,
            Command::FetchCacheData,
            Command::SetNetworkEndpoint { url: "x".into() },
            Command::FlushWorkingArea,
            Command::GracefulClose,
            Command::WriteCacheData {
                cache: CacheData::new(),
            },
        ];
        for cmd in samples {
            let value = serde_json::to_value(&cmd).expect("serialize");
            assert_eq!(value["cmd"], cmd.name().to_string());
        }
        assert_eq!(CommandName::iter().count(), 16);
        assert_eq!(CommandName::Load.as_ref(), LOAD);
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let value = serde_json::to_value(Response::ok("set-main-file")).expect("serialize");
        assert_eq!(value, json!({"cmd": "set-main-file", "result": "ok"}));

        let failed = Response::compiled(
            CommandName::Compile,
            CompileOutput {
                status: 1,
                log: "! Undefined control sequence.".into(),
                data: None,
                path: None,
            },
        );
        let value = serde_json::to_value(&failed).expect("serialize");
        assert_eq!(value["result"], "failed");
        assert_eq!(value["status"], 1);
    }

    #[test]
    fn test_response_round_trips_binary() {
        let response = Response::ok("fetch-file").with_data(vec![0, 159, 255]);
        let line = encode_line(&response).expect("encode");
        let back: Response = serde_json::from_str(&line).expect("decode");
        assert_eq!(back, response);
    }

    #[test]
    fn test_decode_unknown_command() {
        let err = decode_command(r#"{"cmd":"compilelatex"}"#).expect_err("unknown");
        assert_eq!(err.cmd, "compilelatex");
        assert_eq!(err.result, Outcome::Failed);
        assert!(err.error.unwrap_or_default().contains("unknown command"));

        let err = decode_command(r#"{"cmd":"set-main-file"}"#).expect_err("missing path");
        assert_eq!(err.cmd, "set-main-file");
        assert!(err.error.unwrap_or_default().contains("malformed"));

        let err = decode_command("not json").expect_err("garbage");
        assert_eq!(err.cmd, "");
    }

    #[test]
    fn test_into_compile_output() {
        let out = Response::failed("compile", "host crashed").into_compile_output();
        assert_eq!(out.status, -1);
        assert_eq!(out.log, "host crashed");
        assert!(!out.succeeded());
    }
}
