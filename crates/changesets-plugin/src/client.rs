//! Typed client for the version plugin protocol.

use crate::cancel::CancelToken;
use crate::error::{HostError, Result};
use crate::protocol::{GetVersionRequest, Method, RequestMessage, Response, SetVersionRequest};
use crate::rpc::{Invoke, PluginHost};

/// Reads and writes the version held in one file through a plugin.
pub struct VersionClient<I> {
    invoker: I,
    file_path: String,
}

impl VersionClient<PluginHost> {
    /// Talk to `host` about the file named in its descriptor.
    pub fn for_host(host: PluginHost) -> Self {
        let file_path = host.descriptor().versioned_file.clone();
        Self::new(host, file_path)
    }
}

impl<I: Invoke> VersionClient<I> {
    /// Create a client managing `file_path` through `invoker`.
    pub fn new(invoker: I, file_path: impl Into<String>) -> Self {
        Self {
            invoker,
            file_path: file_path.into(),
        }
    }

    /// The underlying channel.
    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// The file whose version this client manages.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Ask the plugin for the current version.
    pub fn get_version(&self, cancel: &CancelToken) -> Result<String> {
        let request = RequestMessage::GetVersion(GetVersionRequest {
            file_path: self.file_path.clone(),
        });
        let response = self.send(&request, cancel)?;
        response.version.ok_or_else(|| {
            HostError::MalformedResponse("GetVersion response has no version".to_string())
        })
    }

    /// Ask the plugin to write `version`.
    pub fn set_version(&self, version: &str, cancel: &CancelToken) -> Result<()> {
        let request = RequestMessage::SetVersion(SetVersionRequest {
            file_path: self.file_path.clone(),
            version: version.to_string(),
        });
        self.send(&request, cancel).map(drop)
    }

    fn send(&self, request: &RequestMessage, cancel: &CancelToken) -> Result<Response> {
        let method: Method = request.method();
        let response: Response = self.invoker.invoke(method.as_str(), request, cancel)?;
        if response.status.is_ok() {
            Ok(response)
        } else {
            Err(HostError::Rejected {
                code: response.status.code,
                message: response
                    .status
                    .message
                    .unwrap_or_else(|| format!("{method} failed with status {}", response.status.code)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, Status};
    use parking_lot::Mutex;

    /// In-memory plugin that stores one version string.
    struct FakePlugin {
        version: Mutex<String>,
        fail_with: Option<Status>,
    }

    impl FakePlugin {
        fn new(version: &str) -> Self {
            Self {
                version: Mutex::new(version.to_string()),
                fail_with: None,
            }
        }
    }

    impl Invoke for FakePlugin {
        fn call(&self, method: &str, request: &[u8], _cancel: &CancelToken) -> Result<Vec<u8>> {
            if let Some(status) = &self.fail_with {
                return protocol::encode(&Response {
                    status: status.clone(),
                    version: None,
                });
            }
            let request: RequestMessage = protocol::decode(request)?;
            assert_eq!(request.method().as_str(), method);
            let response = match request {
                RequestMessage::GetVersion(_) => Response {
                    status: Status::default(),
                    version: Some(self.version.lock().clone()),
                },
                RequestMessage::SetVersion(set) => {
                    *self.version.lock() = set.version;
                    Response::default()
                }
            };
            protocol::encode(&response)
        }
    }

    #[test]
    fn test_get_set_get() {
        let client = VersionClient::new(FakePlugin::new("1.0.0"), "VERSION");
        let cancel = CancelToken::new();

        assert_eq!(client.get_version(&cancel).unwrap(), "1.0.0");
        client.set_version("1.1.0", &cancel).unwrap();
        assert_eq!(client.get_version(&cancel).unwrap(), "1.1.0");
        assert_eq!(client.file_path(), "VERSION");
    }

    #[test]
    fn test_non_zero_status_is_an_error() {
        let plugin = FakePlugin {
            version: Mutex::new(String::new()),
            fail_with: Some(Status {
                code: 2,
                message: Some("no version field".to_string()),
            }),
        };
        let client = VersionClient::new(plugin, "VERSION");

        let err = client.get_version(&CancelToken::new()).unwrap_err();
        assert_eq!(err.to_string(), "no version field");
        assert!(matches!(err, HostError::Rejected { code: 2, .. }));
    }

    #[test]
    fn test_status_without_message() {
        let plugin = FakePlugin {
            version: Mutex::new(String::new()),
            fail_with: Some(Status {
                code: 5,
                message: None,
            }),
        };
        let client = VersionClient::new(plugin, "VERSION");

        let err = client.set_version("2.0.0", &CancelToken::new()).unwrap_err();
        assert_eq!(err.to_string(), "SetVersion failed with status 5");
    }

    #[test]
    fn test_missing_version_is_malformed() {
        struct Empty;
        impl Invoke for Empty {
            fn call(&self, _: &str, _: &[u8], _: &CancelToken) -> Result<Vec<u8>> {
                protocol::encode(&Response::default())
            }
        }

        let err = VersionClient::new(Empty, "VERSION")
            .get_version(&CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, HostError::MalformedResponse(_)));
    }
}
