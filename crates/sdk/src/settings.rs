//! Server endpoint configuration.

use http::uri::{InvalidUri, InvalidUriParts, Uri};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Invalid(#[from] InvalidUri),
    #[error(transparent)]
    InvalidParts(#[from] InvalidUriParts),
    #[error(transparent)]
    Build(#[from] http::Error),
    #[error("unknown URI scheme `{0}`")]
    UnknownScheme(String),
    #[error("endpoint has no host")]
    MissingHost,
}

/// Where the Berth server lives and how to reach it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub hostname: String,
    pub port: Option<u16>,
    pub secure: bool,
}

impl Settings {
    pub fn new(hostname: &str) -> Settings {
        Settings {
            hostname: hostname.to_string(),
            port: None,
            secure: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Settings {
        self.port = Some(port);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Settings {
        self.secure = secure;
        self
    }

    /// Parses `"https://host:port"` / `"host:port"` style endpoints. A
    /// missing scheme means insecure; anything but http(s)/ws(s) is
    /// rejected.
    pub fn from_endpoint(endpoint: &str) -> Result<Settings, EndpointError> {
        let uri: Uri = endpoint.parse()?;
        let secure = match uri.scheme_str() {
            Some("https") | Some("wss") => true,
            Some("http") | Some("ws") | None => false,
            Some(other) => return Err(EndpointError::UnknownScheme(other.to_string())),
        };
        let hostname = uri.host().ok_or(EndpointError::MissingHost)?.to_string();
        Ok(Settings {
            hostname,
            port: uri.port_u16(),
            secure,
        })
    }

    fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.hostname, port),
            None => self.hostname.clone(),
        }
    }

    fn endpoint(&self, scheme: &str) -> Result<Uri, EndpointError> {
        Ok(Uri::builder()
            .scheme(scheme)
            .authority(self.authority().as_str())
            .path_and_query("/")
            .build()?)
    }

    pub fn http_endpoint(&self) -> Result<Uri, EndpointError> {
        self.endpoint(if self.secure { "https" } else { "http" })
    }

    pub fn ws_endpoint(&self) -> Result<Uri, EndpointError> {
        self.endpoint(if self.secure { "wss" } else { "ws" })
    }
}
