//! Version plugin for a plain text `VERSION` file.
//!
//! Run by the changesets host as `plugin.wasm <Method>` with a MessagePack
//! request on stdin. The response is written to stdout. Problems with the
//! versioned file are reported in the response status; a request that cannot
//! be understood at all is reported on stderr with a non-zero exit code.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct GetVersionRequest {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct SetVersionRequest {
    file_path: String,
    version: String,
}

#[derive(Debug, Deserialize)]
enum RequestMessage {
    GetVersion(GetVersionRequest),
    SetVersion(SetVersionRequest),
}

#[derive(Debug, Default, Serialize)]
struct Status {
    code: i32,
    message: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct Response {
    status: Status,
    version: Option<String>,
}

impl Response {
    fn failed(message: String) -> Self {
        Self {
            status: Status {
                code: 1,
                message: Some(message),
            },
            version: None,
        }
    }
}

fn get_version(request: &GetVersionRequest) -> Response {
    match std::fs::read_to_string(&request.file_path) {
        Ok(contents) => {
            let version = contents.trim();
            if version.is_empty() {
                Response::failed(format!("{} is empty", request.file_path))
            } else {
                Response {
                    version: Some(version.to_string()),
                    ..Response::default()
                }
            }
        }
        Err(e) => Response::failed(format!("failed to read {}: {e}", request.file_path)),
    }
}

fn set_version(request: &SetVersionRequest) -> Response {
    match std::fs::write(&request.file_path, format!("{}\n", request.version.trim())) {
        Ok(()) => Response::default(),
        Err(e) => Response::failed(format!("failed to write {}: {e}", request.file_path)),
    }
}

fn handle(method: &str, input: &[u8]) -> Result<Response, String> {
    let request: RequestMessage =
        rmp_serde::from_slice(input).map_err(|e| format!("invalid request: {e}"))?;

    match (method, &request) {
        ("GetVersion", RequestMessage::GetVersion(get)) => Ok(get_version(get)),
        ("SetVersion", RequestMessage::SetVersion(set)) => Ok(set_version(set)),
        ("GetVersion" | "SetVersion", _) => Err(format!("request does not match method {method}")),
        _ => Err(format!("unknown method '{method}'")),
    }
}

fn run() -> Result<(), String> {
    let method = std::env::args()
        .nth(1)
        .ok_or_else(|| "missing method argument".to_string())?;

    let mut input = Vec::new();
    io::stdin()
        .read_to_end(&mut input)
        .map_err(|e| format!("failed to read request: {e}"))?;

    let response = handle(&method, &input)?;
    let output = rmp_serde::to_vec_named(&response).map_err(|e| format!("failed to encode response: {e}"))?;
    io::stdout()
        .write_all(&output)
        .map_err(|e| format!("failed to write response: {e}"))
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprint!("{message}");
            ExitCode::FAILURE
        }
    }
}
