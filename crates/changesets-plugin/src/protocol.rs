//! Wire types exchanged with version plugins.
//!
//! A plugin is started as `plugin.wasm <Method>`, reads one MessagePack
//! encoded [`RequestMessage`] from stdin and writes one MessagePack encoded
//! [`Response`] to stdout. Structs are encoded as maps with named fields and
//! the request is an externally tagged enum, so guests written in other
//! languages only need a MessagePack library:
//!
//! ```text
//! {"GetVersion": {"file_path": "pyproject.toml"}}
//! {"SetVersion": {"file_path": "pyproject.toml", "version": "1.2.3"}}
//! {"status": {"code": 0, "message": null}, "version": "1.2.3"}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Methods a version plugin implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read the current version from the versioned file.
    GetVersion,
    /// Write a new version into the versioned file.
    SetVersion,
}

impl Method {
    /// The name passed to the plugin as its first argument.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetVersion => "GetVersion",
            Self::SetVersion => "SetVersion",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GetVersion" => Ok(Self::GetVersion),
            "SetVersion" => Ok(Self::SetVersion),
            other => Err(HostError::Unimplemented(format!("unknown method '{other}'"))),
        }
    }
}

/// Request body for [`Method::GetVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVersionRequest {
    /// File to read the version from.
    pub file_path: String,
}

/// Request body for [`Method::SetVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetVersionRequest {
    /// File to write the version into.
    pub file_path: String,
    /// The new version string.
    pub version: String,
}

/// The request union sent on the plugin's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMessage {
    /// Read the current version.
    GetVersion(GetVersionRequest),
    /// Write a new version.
    SetVersion(SetVersionRequest),
}

impl RequestMessage {
    /// The method this request must be dispatched to.
    pub const fn method(&self) -> Method {
        match self {
            Self::GetVersion(_) => Method::GetVersion,
            Self::SetVersion(_) => Method::SetVersion,
        }
    }
}

/// Outcome reported by the plugin itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// 0 on success.
    pub code: i32,
    /// Human-readable explanation for a non-zero code.
    #[serde(default)]
    pub message: Option<String>,
}

impl Status {
    /// Whether the plugin reported success.
    pub const fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// The response read from the plugin's stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Plugin-reported status.
    #[serde(default)]
    pub status: Status,
    /// The version read by `GetVersion`; absent for `SetVersion`.
    #[serde(default)]
    pub version: Option<String>,
}

/// Encode a message for a plugin.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(message).map_err(|e| HostError::Serialization(e.to_string()))
}

/// Decode a plugin's output.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| HostError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_method_names() {
        assert_eq!(Method::GetVersion.as_str(), "GetVersion");
        assert_eq!("SetVersion".parse::<Method>().unwrap(), Method::SetVersion);
        assert!("Stream".parse::<Method>().is_err());
    }

    #[test]
    fn test_request_dispatch() {
        let request = RequestMessage::SetVersion(SetVersionRequest {
            file_path: "VERSION".to_string(),
            version: "1.0.0".to_string(),
        });
        assert_eq!(request.method(), Method::SetVersion);
    }

    #[test]
    fn test_request_is_tagged_map() {
        let request = RequestMessage::GetVersion(GetVersionRequest {
            file_path: "VERSION".to_string(),
        });
        let bytes = encode(&request).unwrap();

        let generic: BTreeMap<String, BTreeMap<String, String>> = decode(&bytes).unwrap();
        assert_eq!(generic["GetVersion"]["file_path"], "VERSION");
    }

    #[test]
    fn test_response_defaults() {
        // A guest that only writes a version still decodes.
        #[derive(Serialize)]
        struct Minimal {
            version: &'static str,
        }
        let bytes = encode(&Minimal { version: "2.0.0" }).unwrap();
        let response: Response = decode(&bytes).unwrap();
        assert!(response.status.is_ok());
        assert_eq!(response.version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = decode::<Response>(b"\xc1not msgpack").unwrap_err();
        assert!(matches!(err, HostError::MalformedResponse(_)));
    }
}
