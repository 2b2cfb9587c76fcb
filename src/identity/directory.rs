use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

const SEARCH_USERS_PATH: &str = "/v1/search/users/";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct DirectoryUser {
    pub username: String,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to build directory HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("directory request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("directory returned HTTP {status} for '{url}'")]
    Status { url: String, status: u16 },
    #[error("failed to decode directory response from '{url}': {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("directory unavailable: {message}")]
    Unavailable { message: String },
}

pub trait Directory {
    fn search_by_email(&self, email: &str) -> Result<Vec<DirectoryUser>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<DirectoryUser>,
}

/// Account directory reachable over the FASJSON REST API.
pub struct FasjsonDirectory {
    http: Client,
    search_url: String,
}

impl FasjsonDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DirectoryError::Client)?;

        Ok(Self {
            http,
            search_url: format!("{}{SEARCH_USERS_PATH}", base_url.trim_end_matches('/')),
        })
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }
}

impl Directory for FasjsonDirectory {
    fn search_by_email(&self, email: &str) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let response = self
            .http
            .get(&self.search_url)
            .query(&[("email", email)])
            .send()
            .map_err(|source| DirectoryError::Request {
                url: self.search_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                url: self.search_url.clone(),
                status: status.as_u16(),
            });
        }

        let body: SearchResponse = response.json().map_err(|source| DirectoryError::Decode {
            url: self.search_url.clone(),
            source,
        })?;

        Ok(body.result)
    }
}
