use crate::error::{EntityApiErrorKind, Error};
use log::*;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service::config::Config;
use service::session::TokenStore;

/// Shape of the error bodies the API sends back. Only `message` is used.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// JSON client bound to the API base URL.
///
/// Every request carries the bearer token currently held in the `TokenStore`.
/// A 401 answer clears that token, so a stale session is never replayed.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
}

impl ApiClient {
    pub fn new(config: &Config, tokens: TokenStore) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self::with_client(client, &config.api_base_url, tokens))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, tokens: TokenStore) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.get() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn get<T, Q>(&self, path: &str, query: Option<&Q>) -> Result<T, Error>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut request = self
            .client
            .get(self.url(path))
            .header(header::CACHE_CONTROL, "no-cache");
        if let Some(query) = query {
            request = request.query(query);
        }

        let response = self.execute(request).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn post<T, B>(&self, path: &str, body: Option<&B>) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send_post(path, body).await?;
        Ok(response.json::<T>().await?)
    }

    /// POST whose response body is irrelevant.
    pub async fn post_empty<B>(&self, path: &str, body: Option<&B>) -> Result<(), Error>
    where
        B: Serialize + ?Sized,
    {
        self.send_post(path, body).await.map(|_| ())
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.client.put(self.url(path)).json(body);
        let response = self.execute(request).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        let request = self.client.delete(self.url(path));
        self.execute(request).await.map(|_| ())
    }

    async fn send_post<B>(&self, path: &str, body: Option<&B>) -> Result<Response, Error>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request).await
    }

    /// Sends the request and turns any non-success status into an `Error`.
    async fn execute(&self, request: RequestBuilder) -> Result<Response, Error> {
        let response = self.authorize(request).send().await.map_err(|e| {
            warn!("Request to {} failed: {e}", self.base_url);
            Error::from(e)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        match status {
            StatusCode::UNAUTHORIZED => {
                warn!("{url} answered 401, clearing stored token");
                self.tokens.clear();
                Err(Error::new(EntityApiErrorKind::RecordUnauthenticated))
            }
            StatusCode::NOT_FOUND => {
                debug!("{url} answered 404");
                Err(Error::new(EntityApiErrorKind::RecordNotFound))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ErrorBody>(&body)
                    .ok()
                    .and_then(|body| body.message);
                warn!("{url} answered {status}: {body}");
                Err(Error::new(EntityApiErrorKind::Status {
                    code: status.as_u16(),
                    message,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::{json, Value};

    fn client_for(server: &Server, tokens: TokenStore) -> ApiClient {
        ApiClient::with_client(reqwest::Client::new(), &server.url(), tokens)
    }

    #[tokio::test]
    async fn get_sends_bearer_token_and_no_cache() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .match_header("authorization", "Bearer t-1")
            .match_header("cache-control", "no-cache")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let tokens = TokenStore::new();
        tokens.set("t-1".to_string());
        let client = client_for(&server, tokens);

        let body: Value = client.get::<_, ()>("/ping", None).await.unwrap();

        assert_eq!(body, json!({ "ok": true }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_serializes_query_parameters() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "2".into()),
                Matcher::UrlEncoded("name".into(), "ana".into()),
            ]))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = client_for(&server, TokenStore::new());
        let query = json!({ "page": 2, "name": "ana" });
        let body: Vec<Value> = client.get("/search", Some(&query)).await.unwrap();

        assert!(body.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_clears_the_token() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(401)
            .create_async()
            .await;

        let tokens = TokenStore::new();
        tokens.set("expired".to_string());
        let client = client_for(&server, tokens.clone());

        let err = client.get::<Value, ()>("/ping", None).await.unwrap_err();

        assert_eq!(err.error_kind, EntityApiErrorKind::RecordUnauthenticated);
        assert!(!tokens.is_present());
    }

    #[tokio::test]
    async fn error_status_carries_server_message() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/things")
            .with_status(422)
            .with_body(r#"{"message":"Email already registered"}"#)
            .create_async()
            .await;

        let client = client_for(&server, TokenStore::new());
        let err = client
            .post::<Value, _>("/things", Some(&json!({})))
            .await
            .unwrap_err();

        assert_eq!(
            err.error_kind,
            EntityApiErrorKind::Status {
                code: 422,
                message: Some("Email already registered".to_string()),
            }
        );
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[tokio::test]
    async fn not_found_maps_to_record_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("DELETE", "/things/1")
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server, TokenStore::new());
        let err = client.delete("/things/1").await.unwrap_err();

        assert_eq!(err.error_kind, EntityApiErrorKind::RecordNotFound);
    }

    #[tokio::test]
    async fn malformed_body_maps_to_invalid_response() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = client_for(&server, TokenStore::new());
        let err = client.get::<Value, ()>("/ping", None).await.unwrap_err();

        assert_eq!(err.error_kind, EntityApiErrorKind::InvalidResponse);
    }

    #[test]
    fn new_builds_from_config() {
        use clap::Parser;

        let config = Config::parse_from([
            "registration_sync",
            "--api-base-url",
            "http://api.test/v1/",
        ]);
        let client = ApiClient::new(&config, TokenStore::new()).unwrap();
        assert_eq!(client.base_url(), "http://api.test/v1");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::with_client(
            reqwest::Client::new(),
            "http://localhost:3001/api/",
            TokenStore::new(),
        );
        assert_eq!(client.url("/users"), "http://localhost:3001/api/users");
    }
}
