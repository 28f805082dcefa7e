use anyhow::Result;
use async_trait::async_trait;
use sigcore::net::{HttpClient, HttpMethod, HttpRequest, HttpResponse};

/// HTTP client implementation using `ureq` for synchronous HTTP requests.
/// Since `ureq` is blocking, all requests are wrapped in `tokio::task::spawn_blocking`.
#[derive(Debug, Clone, Default)]
pub struct UreqHttpClient;

impl UreqHttpClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        tokio::task::spawn_blocking(move || {
            let body = request.body.unwrap_or_default();
            let response = match request.method {
                HttpMethod::Get => {
                    let mut req = ureq::get(&request.url);
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    req.call()?
                }
                HttpMethod::Delete => {
                    let mut req = ureq::delete(&request.url);
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    req.call()?
                }
                HttpMethod::Post => {
                    let mut req = ureq::post(&request.url);
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    req.send(&body[..])?
                }
                HttpMethod::Patch => {
                    let mut req = ureq::patch(&request.url);
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    req.send(&body[..])?
                }
            };

            let status_code = response.status().as_u16();
            let mut body = response.into_body();
            let body_bytes = body.read_to_vec()?;

            Ok(HttpResponse {
                status_code,
                body: body_bytes,
            })
        })
        .await?
    }
}
