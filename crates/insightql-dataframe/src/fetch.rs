//! HTTP fetching for API-backed data sources: method, headers, and auth are
//! all read from the source descriptor's opaque `connection_info` map.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{DataFrameError, Result};

/// Fetch the raw response bytes for an API source, honoring `method`
/// (default `GET`), `headers` (a JSON object of string values), and either
/// HTTP basic auth (`username`/`password`) or a bearer token
/// (`bearer_token`), all read from `connection_info`.
pub async fn fetch_bytes(client: &reqwest::Client, connection_info: &IndexMap<String, Value>) -> Result<Vec<u8>> {
    let url = connection_info
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| DataFrameError::Fetch("api source missing 'url'".to_string()))?;
    let method = connection_info
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_ascii_uppercase();

    let mut builder = match method.as_str() {
        "POST" => client.post(url),
        "PUT" => client.put(url),
        _ => client.get(url),
    };

    if let Some(headers) = connection_info.get("headers").and_then(Value::as_object) {
        for (key, value) in headers {
            if let Some(value) = value.as_str() {
                builder = builder.header(key.as_str(), value);
            }
        }
    }

    if let Some(token) = connection_info.get("bearer_token").and_then(Value::as_str) {
        builder = builder.bearer_auth(token);
    } else if let Some(username) = connection_info.get("username").and_then(Value::as_str) {
        let password = connection_info.get("password").and_then(Value::as_str);
        builder = builder.basic_auth(username, password);
    }

    if let Some(body) = connection_info.get("body").and_then(Value::as_str) {
        builder = builder.body(body.to_string());
    }

    let response = builder.send().await.map_err(|e| DataFrameError::Fetch(e.to_string()))?;
    if !response.status().is_success() {
        return Err(DataFrameError::Fetch(format!("non-success status: {}", response.status())));
    }
    response.bytes().await.map(|b| b.to_vec()).map_err(|e| DataFrameError::Fetch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_is_a_fetch_error() {
        let client = reqwest::Client::new();
        let info = IndexMap::new();
        let err = fetch_bytes(&client, &info).await.unwrap_err();
        assert!(matches!(err, DataFrameError::Fetch(_)));
    }

    #[tokio::test]
    async fn fetches_json_body_from_wiremock_server() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(header("authorization", "Bearer tok123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[{\"a\":1}]"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let mut info = IndexMap::new();
        info.insert("url".to_string(), serde_json::json!(format!("{}/data", server.uri())));
        info.insert("bearer_token".to_string(), serde_json::json!("tok123"));

        let bytes = fetch_bytes(&client, &info).await.unwrap();
        assert_eq!(bytes, b"[{\"a\":1}]");
    }
}
