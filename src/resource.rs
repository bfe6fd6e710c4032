//! Remote resource addressing: URL, transport and credentials.
use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{DownloadError, DownloadResult};

pub const FTP_DEFAULT_PORT: u16 = 21;
const FTP_ANONYMOUS_USER: &str = "anonymous";
const FTP_ANONYMOUS_PASSWORD: &str = "anonymous@";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Ftp,
}

impl Transport {
    fn from_scheme(scheme: &str) -> DownloadResult<Self> {
        match scheme {
            "http" | "https" => Ok(Transport::Http),
            "ftp" => Ok(Transport::Ftp),
            other => Err(DownloadError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }

    /// Fills the fields missing here from `fallback`.
    fn or(self, fallback: Credentials) -> Credentials {
        Credentials {
            username: self.username.or(fallback.username),
            password: self.password.or(fallback.password),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A downloadable remote file.
///
/// Credentials embedded in the URL are moved out of it; explicitly supplied
/// ones win field by field.
#[derive(Debug, Clone)]
pub struct Resource {
    url: Url,
    transport: Transport,
    credentials: Credentials,
}

impl Resource {
    pub fn parse(url: &str, explicit: Credentials) -> DownloadResult<Self> {
        let mut url = Url::parse(url).map_err(|source| DownloadError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let transport = Transport::from_scheme(url.scheme())?;

        let embedded = Credentials {
            username: Some(url.username())
                .filter(|u| !u.is_empty())
                .map(decode),
            password: url.password().map(decode),
        };
        // Neither call can fail on a URL that already has a host.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        if url.host_str().is_none() {
            return Err(DownloadError::InvalidConfig(format!("{} has no host", url)));
        }

        Ok(Self {
            url,
            transport,
            credentials: explicit.or(embedded),
        })
    }

    /// The URL without userinfo.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Host and port of the FTP control connection.
    pub fn ftp_address(&self) -> (String, u16) {
        (
            self.url.host_str().unwrap_or_default().to_string(),
            self.url.port().unwrap_or(FTP_DEFAULT_PORT),
        )
    }

    /// FTP login pair, anonymous when no user is known.
    pub fn ftp_login(&self) -> (String, String) {
        match &self.credentials.username {
            Some(user) => (
                user.clone(),
                self.credentials.password.clone().unwrap_or_default(),
            ),
            None => (
                FTP_ANONYMOUS_USER.to_string(),
                self.credentials
                    .password
                    .clone()
                    .unwrap_or_else(|| FTP_ANONYMOUS_PASSWORD.to_string()),
            ),
        }
    }

    /// Decoded remote path split into its parent directory and file name.
    pub fn remote_path(&self) -> (String, String) {
        let path = decode(self.url.path());
        match path.rsplit_once('/') {
            Some((dir, name)) if !dir.is_empty() => (dir.to_string(), name.to_string()),
            Some((_, name)) => ("/".to_string(), name.to_string()),
            None => ("/".to_string(), path),
        }
    }

    /// Last path segment, decoded; empty when the URL ends in a slash.
    pub fn file_name(&self) -> String {
        self.remote_path().1
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url.fmt(f)
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
