//! External HTTP call step

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::params::{optional_bool, optional_object, optional_str, required_str};
use crate::domain::workflow::{ParamField, ParamType};
use crate::domain::{
    ParamSchema, StepError, StepHandler, StepMetadata, StepResult, TemplateContext,
};
use crate::infrastructure::http_client::{HttpClientTrait, HttpMethod, HttpRequest};

#[derive(Debug)]
struct HttpParams {
    request: HttpRequest,
    fail_on_error: bool,
}

impl HttpParams {
    fn parse(params: &Value) -> Result<Self, StepError> {
        let url = required_str(params, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StepError::invalid_params(format!(
                "param 'url' must be an http(s) URL, got '{}'",
                url
            )));
        }

        let method = match optional_str(params, "method")? {
            Some(m) => m.parse::<HttpMethod>().map_err(StepError::invalid_params)?,
            None => HttpMethod::default(),
        };

        let mut request = HttpRequest::new(method, url);

        if let Some(headers) = optional_object(params, "headers")? {
            for (name, value) in headers {
                let value = value.as_str().ok_or_else(|| {
                    StepError::invalid_params(format!("header '{}' must be a string", name))
                })?;
                request = request.with_header(name, value);
            }
        }

        if let Some(body) = params.get("body").filter(|b| !b.is_null()) {
            request = request.with_body(body.clone());
        }

        Ok(Self {
            request,
            fail_on_error: optional_bool(params, "failOnError")?.unwrap_or(true),
        })
    }
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// Handler for `http_request` steps
#[derive(Clone)]
pub struct HttpRequestHandler {
    client: Arc<dyn HttpClientTrait>,
}

impl std::fmt::Debug for HttpRequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequestHandler")
            .field("client", &self.client)
            .finish()
    }
}

impl HttpRequestHandler {
    pub fn new(client: Arc<dyn HttpClientTrait>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for HttpRequestHandler {
    fn validate_params(&self, params: &Value) -> Result<(), StepError> {
        self.param_schema().check(params)?;
        HttpParams::parse(params).map(|_| ())
    }

    async fn execute(&self, params: &Value, _context: &TemplateContext) -> StepResult {
        let metadata = StepMetadata::default().with_external_calls(1);

        let HttpParams {
            request,
            fail_on_error,
        } = match HttpParams::parse(params) {
            Ok(params) => params,
            Err(e) => return StepResult::failure(e),
        };

        debug!(method = %request.method, url = %request.url, "Sending HTTP request");

        let response = match self.client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                return StepResult::failure(StepError::new("HTTP_REQUEST_FAILED", e.to_string()))
                    .with_metadata(metadata);
            }
        };

        if fail_on_error && !response.is_success() {
            let message = format!("HTTP {}: {}", response.status, response.body);
            let error = if is_retryable_status(response.status) {
                StepError::new("HTTP_ERROR", message)
            } else {
                StepError::fatal("HTTP_ERROR", message)
            };
            return StepResult::failure(error).with_metadata(metadata);
        }

        StepResult::success(json!({
            "status": response.status,
            "ok": response.is_success(),
            "body": response.body,
        }))
        .with_metadata(metadata)
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(ParamField::required("url", ParamType::String).with_description("http or https URL"))
            .field(
                ParamField::optional("method", ParamType::String)
                    .with_default(json!(HttpMethod::default().as_str())),
            )
            .field(
                ParamField::optional("headers", ParamType::Object)
                    .with_description("Header name to string value"),
            )
            .field(ParamField::optional("body", ParamType::Any).with_description("JSON request body"))
            .field(
                ParamField::optional("failOnError", ParamType::Boolean)
                    .with_description("Treat non-2xx responses as step failures")
                    .with_default(json!(true)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionScope;
    use crate::infrastructure::http_client::mock::MockHttpClient;
    use crate::infrastructure::http_client::HttpClient;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const URL: &str = "https://hooks.example.com/notify";

    fn context() -> TemplateContext {
        TemplateContext::new(json!({}), &ExecutionScope::new("wf", "exec", "acme"))
    }

    fn handler(client: MockHttpClient) -> (HttpRequestHandler, Arc<MockHttpClient>) {
        let client = Arc::new(client);
        (HttpRequestHandler::new(client.clone()), client)
    }

    #[test]
    fn test_validate_params() {
        let (handler, _) = handler(MockHttpClient::new());

        assert!(handler.validate_params(&json!({"url": URL})).is_ok());
        assert!(handler
            .validate_params(&json!({"url": URL, "method": "post", "headers": {"X-Key": "k"}}))
            .is_ok());
        assert!(handler.validate_params(&json!({"url": "ftp://x"})).is_err());
        assert!(handler
            .validate_params(&json!({"url": URL, "method": "TRACE"}))
            .is_err());
        assert!(handler
            .validate_params(&json!({"url": URL, "headers": {"X-Retry": 3}}))
            .is_err());
        assert!(handler.validate_params(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_execute_sends_request() {
        let (handler, client) =
            handler(MockHttpClient::new().with_send_response(URL, 201, json!({"id": 7})));

        let result = handler
            .execute(
                &json!({
                    "url": URL,
                    "method": "POST",
                    "headers": {"X-Key": "secret"},
                    "body": {"text": "hello"}
                }),
                &context(),
            )
            .await;

        assert!(result.success);
        assert_eq!(
            result.output,
            json!({"status": 201, "ok": true, "body": {"id": 7}})
        );
        assert_eq!(result.metadata.external_calls, 1);

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(
            requests[0].headers,
            vec![("X-Key".to_string(), "secret".to_string())]
        );
        assert_eq!(requests[0].body, Some(json!({"text": "hello"})));
    }

    #[tokio::test]
    async fn test_client_error_is_not_recoverable() {
        let (handler, _) =
            handler(MockHttpClient::new().with_send_response(URL, 404, json!("missing")));

        let result = handler.execute(&json!({"url": URL}), &context()).await;

        let error = result.error.unwrap();
        assert_eq!(error.code, "HTTP_ERROR");
        assert!(!error.recoverable);
        assert!(error.message.contains("404"));
    }

    #[tokio::test]
    async fn test_server_error_is_recoverable() {
        let (handler, _) = handler(MockHttpClient::new().with_send_response(URL, 503, Value::Null));

        let result = handler.execute(&json!({"url": URL}), &context()).await;

        assert!(result.error.unwrap().recoverable);
    }

    #[tokio::test]
    async fn test_fail_on_error_disabled() {
        let (handler, _) =
            handler(MockHttpClient::new().with_send_response(URL, 500, json!({"e": 1})));

        let result = handler
            .execute(&json!({"url": URL, "failOnError": "false"}), &context())
            .await;

        assert!(result.success);
        assert_eq!(result.output["status"], json!(500));
        assert_eq!(result.output["ok"], json!(false));
    }

    #[tokio::test]
    async fn test_network_error() {
        let (handler, _) = handler(MockHttpClient::new().with_error(URL, "connection refused"));

        let result = handler.execute(&json!({"url": URL}), &context()).await;

        let error = result.error.unwrap();
        assert_eq!(error.code, "HTTP_REQUEST_FAILED");
        assert!(error.recoverable);
    }

    #[tokio::test]
    async fn test_against_local_server() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/items/1"))
            .and(header("Content-Type", "application/json"))
            .and(body_json(json!({"name": "x"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updated": true})))
            .mount(&server)
            .await;

        let handler = HttpRequestHandler::new(Arc::new(HttpClient::new()));
        let result = handler
            .execute(
                &json!({
                    "url": format!("{}/items/1", server.uri()),
                    "method": "PUT",
                    "body": {"name": "x"}
                }),
                &context(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.output["body"], json!({"updated": true}));
    }
}
