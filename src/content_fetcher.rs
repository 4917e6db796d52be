use std::time::Duration;

use async_trait::async_trait;

use crate::errors::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            _ => None,
        }
    }
}

/// Retrieves the body of a remote URL for the `fetchContent` fallback tool.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, method: HttpMethod) -> Result<String, ToolError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, method: HttpMethod) -> Result<String, ToolError> {
        let request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };

        let response = request
            .send()
            .await
            .map_err(|err| ToolError::Fetch(err.to_string()))?;

        response
            .text()
            .await
            .map_err(|err| ToolError::Fetch(err.to_string()))
    }
}
