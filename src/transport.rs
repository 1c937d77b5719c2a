pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        bytes: Vec<u8>,
        file_name: String,
        mime: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    pub fn png(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                bytes,
                file_name: file_name.into(),
                mime: String::from("image/png"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<FormField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub bearer_token: Option<String>,
    pub body: RequestBody,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            bearer_token: None,
            body: RequestBody::Empty,
            timeout,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            bearer_token: None,
            body: RequestBody::Json(body),
            timeout,
        }
    }

    pub fn post_multipart(url: impl Into<String>, fields: Vec<FormField>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            bearer_token: None,
            body: RequestBody::Multipart(fields),
            timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            RequestBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.body.as_slice()).to_string()
    }

    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.body.as_slice())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub trait HttpTransport: Send + Sync + 'static {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub type SharedHttpTransport = Arc<dyn HttpTransport>;

/// Blocking reqwest transport with a client per request. Must run outside the
/// async runtime (the HTTP bridge uses `spawn_blocking`).
#[derive(Debug, Default, Clone)]
pub struct ReqwestTransport;

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Network(format!("http client init failed: {e}")))?;
        let mut builder = match request.method {
            HttpMethod::Get => client.get(request.url.as_str()),
            HttpMethod::Post => client.post(request.url.as_str()),
        }
        .timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = request.bearer_token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder = attach_body(builder, &request.body)?;

        let resp = builder.send().map_err(classify_reqwest_error)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().map_err(classify_reqwest_error)?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn attach_body(builder: RequestBuilder, body: &RequestBody) -> Result<RequestBuilder, TransportError> {
    match body {
        RequestBody::Empty => Ok(builder),
        RequestBody::Json(value) => Ok(builder.json(value)),
        RequestBody::Multipart(fields) => {
            let mut form = multipart::Form::new();
            for field in fields.iter() {
                form = match &field.value {
                    FormValue::Text(text) => form.text(field.name.clone(), text.clone()),
                    FormValue::File {
                        bytes,
                        file_name,
                        mime,
                    } => {
                        let part = multipart::Part::bytes(bytes.clone())
                            .file_name(file_name.clone())
                            .mime_str(mime.as_str())
                            .map_err(|e| {
                                TransportError::InvalidRequest(format!("invalid mime '{mime}': {e}"))
                            })?;
                        form.part(field.name.clone(), part)
                    }
                };
            }
            Ok(builder.multipart(form))
        }
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn response_helpers_decode_json_and_text() {
        let resp = HttpResponse::new(200, json!({"data": ["https://x/y.png"]}).to_string());
        assert!(resp.is_success());
        let parsed: Value = resp.json().expect("json should parse");
        assert_eq!(parsed["data"][0], json!("https://x/y.png"));
        assert!(resp.text().contains("y.png"));
        assert!(!HttpResponse::new(429, "slow down").is_success());
    }

    #[test]
    fn request_builders_set_method_headers_and_body() {
        let req = HttpRequest::post_json("https://api.example/v1", json!({"a": 1}), Duration::from_secs(5))
            .with_header("User-Agent", "atelier-nodes")
            .with_bearer("sk-test");
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.headers, vec![(String::from("User-Agent"), String::from("atelier-nodes"))]);
        assert_eq!(req.bearer_token.as_deref(), Some("sk-test"));
        assert_eq!(req.json_body(), Some(&json!({"a": 1})));
        assert_eq!(HttpRequest::get("https://x", Duration::from_secs(1)).json_body(), None);
    }
}
