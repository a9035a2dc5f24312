use std::time::Duration;

use async_trait::async_trait;
use cyder_tools::log::{debug, error};
use reqwest::{header, Proxy};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ClientConfig, Completion, ModelClient, PredictOptions, ProviderError};

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

/// OpenAI-compatible chat-completions client shared by all providers.
pub struct HttpModelClient {
    client: reqwest::Client,
}

impl HttpModelClient {
    pub fn new(proxy: Option<&str>, timeout: Option<Duration>) -> Result<Self, ProviderError> {
        let mut client_builder = reqwest::Client::builder();
        if let Some(proxy_url) = proxy {
            let proxy = Proxy::https(proxy_url).map_err(|e| {
                error!("Invalid proxy URL '{}': {}", proxy_url, e);
                e
            })?;
            client_builder = client_builder.proxy(proxy);
        }
        if let Some(timeout) = timeout {
            client_builder = client_builder.timeout(timeout);
        }
        let client = client_builder.build().map_err(|e| {
            error!("Failed to build reqwest client: {}", e);
            e
        })?;
        Ok(Self { client })
    }
}

pub(crate) fn completion_url(config: &ClientConfig, model: &str) -> String {
    match config {
        ClientConfig::LmStudio { base_url } | ClientConfig::OpenAi { base_url, .. } => {
            format!("{}/chat/completions", base_url.trim_end_matches('/'))
        }
        ClientConfig::Azure {
            endpoint,
            api_version,
            ..
        } => format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            model,
            api_version
        ),
    }
}

pub(crate) fn request_body(
    model: &str,
    content: &str,
    temperature: f64,
    options: &PredictOptions,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [{ "role": "user", "content": content }],
        "temperature": temperature,
    });
    if let Value::Object(fields) = &mut body {
        for (key, value) in options {
            fields.insert(key.clone(), value.clone());
        }
    }
    body
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(
        &self,
        config: &ClientConfig,
        model: &str,
        content: &str,
        temperature: f64,
        options: &PredictOptions,
    ) -> Result<Completion, ProviderError> {
        let url = completion_url(config, model);
        let body = request_body(model, content, temperature, options);
        debug!("[complete] POST {} body: {}", url, body);

        let mut request = self.client.post(&url).json(&body);
        request = match config {
            ClientConfig::LmStudio { .. } => request,
            ClientConfig::OpenAi { api_key, .. } => request.bearer_auth(api_key),
            ClientConfig::Azure { api_key, .. } => request.header("api-key", api_key),
        };

        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatCompletion = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("response has no message content".to_string())
            })?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(Completion {
            text: message,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};

    #[test]
    fn test_completion_urls() {
        let openai = ClientConfig::OpenAi {
            api_key: "k".to_string(),
            base_url: "https://api.example.com/v1/".to_string(),
        };
        assert_eq!(
            completion_url(&openai, "gpt"),
            "https://api.example.com/v1/chat/completions"
        );

        let azure = ClientConfig::Azure {
            api_key: "k".to_string(),
            endpoint: "https://res.openai.azure.com".to_string(),
            api_version: "2024-02-01".to_string(),
        };
        assert_eq!(
            completion_url(&azure, "my-deploy"),
            "https://res.openai.azure.com/openai/deployments/my-deploy/chat/completions?api-version=2024-02-01"
        );
    }

    #[test]
    fn test_request_body_merges_options() {
        let mut options = PredictOptions::new();
        options.insert("max_tokens".to_string(), json!(64));
        options.insert("temperature".to_string(), json!(0.1));

        let body = request_body("m", "hello", 0.5, &options);
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["temperature"], 0.1);
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_complete_against_local_server() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer sk-test");
                let content = format!("auth={} model={}", authorized, body["model"]);
                Json(json!({
                    "choices": [{ "message": { "content": content } }],
                    "usage": { "prompt_tokens": 7, "completion_tokens": 3 }
                }))
            }),
        );
        let base = serve(router).await;

        let client = HttpModelClient::new(None, None).unwrap();
        let config = ClientConfig::OpenAi {
            api_key: "sk-test".to_string(),
            base_url: format!("{}/v1", base),
        };
        let completion = client
            .complete(&config, "gpt", "hi", 0.0, &PredictOptions::new())
            .await
            .unwrap();

        assert_eq!(completion.text, "auth=true model=\"gpt\"");
        assert_eq!(completion.input_tokens, Some(7));
        assert_eq!(completion.output_tokens, Some(3));
    }

    #[tokio::test]
    async fn test_complete_surfaces_api_errors() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = serve(router).await;

        let client = HttpModelClient::new(None, Some(Duration::from_secs(5))).unwrap();
        let config = ClientConfig::LmStudio { base_url: base };
        let result = client
            .complete(&config, "llama", "hi", 0.0, &PredictOptions::new())
            .await;

        assert!(matches!(
            result,
            Err(ProviderError::Api { status: 401, ref body }) if body == "bad key"
        ));
    }
}
