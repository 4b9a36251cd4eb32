use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

use super::error::{ProviderError, ProviderResult};

#[derive(Debug, Clone)]
pub enum AuthScheme {
    Bearer(String),
    Basic { username: String, password: String },
    None,
}

/// Shared retrying HTTP client for provider APIs: bounded exponential
/// backoff on 429/5xx and transport failures, per-call timeout.
#[derive(Clone)]
pub struct ProviderHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl ProviderHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: &AuthScheme,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> ProviderResult<T> {
        self.execute(method, url, auth, additional_headers, |request| {
            match body {
                Some(payload) => request.json(payload),
                None => request,
            }
        })
        .await
    }

    pub async fn request_form<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: &AuthScheme,
        form: &[(String, String)],
        additional_headers: &[(&str, &str)],
    ) -> ProviderResult<T> {
        self.execute(method, url, auth, additional_headers, |request| {
            request.form(form)
        })
        .await
    }

    async fn execute<T, F>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: &AuthScheme,
        additional_headers: &[(&str, &str)],
        attach_body: F,
    ) -> ProviderResult<T>
    where
        T: DeserializeOwned,
        F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            request = match auth {
                AuthScheme::Bearer(token) => request.bearer_auth(token),
                AuthScheme::Basic { username, password } => {
                    request.basic_auth(username, Some(password))
                }
                AuthScheme::None => request,
            };
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            request = attach_body(request);

            let response = request
                .send()
                .await
                .map_err(|e| ProviderError::NetworkError {
                    message: format!("provider request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            ProviderError::ApiError {
                                provider: "http".to_string(),
                                message: format!("invalid provider JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(ProviderError::RateLimitError {
                            message: "provider rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "provider server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(ProviderError::ApiError {
                        provider: "http".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::NetworkError {
            message: "provider request failed".to_string(),
        }))
    }
}
