use std::time::Duration;

use patchwork_core::tool::{
    Error as ToolError, Tool, ToolResult, truncate_payload,
};
use reqwest::{Client, ClientBuilder, Response};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use super::html::extract_text;

/// Time limit of one fetch, connecting and reading the body included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Input of [`FetchUrlTool`].
#[derive(Deserialize, JsonSchema)]
pub struct FetchUrlParameters {
    #[schemars(description = "Absolute http(s) URL of the page to read.")]
    url: String,
}

/// A tool for reading the text of a web page.
///
/// The page is fetched with a GET request; any status other than success
/// is a failure. The markup is reduced to plain text with
/// [`extract_text`], which is then capped at
/// [`MAX_PAYLOAD_CHARS`](patchwork_core::tool::MAX_PAYLOAD_CHARS).
pub struct FetchUrlTool {
    client: Client,
    parameter_schema: Value,
}

impl FetchUrlTool {
    /// Creates a fetch tool with the default timeout.
    pub fn new() -> Self {
        Self::with_client(build_client(
            Client::builder()
                .timeout(FETCH_TIMEOUT)
                .user_agent(concat!("patchwork/", env!("CARGO_PKG_VERSION"))),
        ))
    }

    /// Creates a fetch tool sending requests through `client`.
    pub fn with_client(client: Client) -> Self {
        FetchUrlTool {
            client,
            parameter_schema: schema_for!(FetchUrlParameters).to_value(),
        }
    }
}

impl Default for FetchUrlTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for FetchUrlTool {
    type Input = FetchUrlParameters;

    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        r#"
Fetches a web page and returns its plain text, without markup.
Use it for links mentioned in the issue. Returns at most 8000 characters."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: FetchUrlParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        async move {
            let url = input.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ToolError::invalid_input()
                    .with_reason(format!("`{url}` is not an http(s) URL")));
            }

            debug!("fetching {url}");
            let body = client
                .get(url)
                .send()
                .await
                .and_then(Response::error_for_status)
                .map_err(|err| fetch_error(url, err))?
                .text()
                .await
                .map_err(|err| fetch_error(url, err))?;

            let text = extract_text(&body);
            Ok(truncate_payload(&text).to_owned())
        }
    }
}

fn build_client(builder: ClientBuilder) -> Client {
    builder.build().unwrap_or_else(|err| {
        warn!("cannot configure the fetch client, using defaults: {err}");
        Client::new()
    })
}

#[inline]
fn fetch_error(url: &str, err: reqwest::Error) -> ToolError {
    ToolError::execution_error().with_reason(format!("fetching {url}: {err}"))
}

#[cfg(test)]
mod tests {
    use patchwork_core::tool::{ErrorKind, MAX_PAYLOAD_CHARS};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serves one HTTP response on a local port and returns the page URL.
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\n\
                 Content-Type: text/html; charset=utf-8\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        format!("http://{addr}/issues/1")
    }

    fn local_tool() -> FetchUrlTool {
        FetchUrlTool::with_client(Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn test_fetch_page_text() {
        let url = serve_once(
            "200 OK",
            "<html><script>x()</script><p>Login fails with 500</p></html>"
                .to_owned(),
        )
        .await;
        let text = local_tool()
            .execute(FetchUrlParameters { url })
            .await
            .unwrap();
        assert_eq!(text, "Login fails with 500");
    }

    #[tokio::test]
    async fn test_long_page_is_capped() {
        let body = format!("<p>{}</p>", "word ".repeat(4000));
        let url = serve_once("200 OK", body).await;
        let text = local_tool()
            .execute(FetchUrlParameters { url })
            .await
            .unwrap();
        assert_eq!(text.chars().count(), MAX_PAYLOAD_CHARS);
        assert!(text.starts_with("word word"));
    }

    #[tokio::test]
    async fn test_error_status() {
        let url = serve_once("404 Not Found", "<p>gone</p>".to_owned()).await;
        let err = local_tool()
            .execute(FetchUrlParameters { url: url.clone() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
        assert!(err.reason().starts_with(&format!("fetching {url}")));
        assert!(err.reason().contains("404"));
    }

    #[test]
    fn test_broken_client_settings_fall_back() {
        let builder = Client::builder().user_agent("bad\nagent");
        assert!(Client::builder().user_agent("bad\nagent").build().is_err());
        let tool = FetchUrlTool::with_client(build_client(builder));
        assert_eq!(tool.name(), "fetch_url");
    }

    #[tokio::test]
    async fn test_rejects_other_schemes() {
        let err = local_tool()
            .execute(FetchUrlParameters {
                url: "file:///etc/passwd".to_owned(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
