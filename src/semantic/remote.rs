//! HTTP client for a hosted image embedding model.
//!
//! Speaks the `multimodalembedding` predict format:
//! request `{"instances":[{"image":{"bytesBase64Encoded":..}}]}`,
//! response `{"predictions":[{"imageEmbedding":[..]}]}`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::embeddings::{sniff_mime, EmbeddingClient, EmbeddingError};

pub struct RemoteEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    bearer_token: Option<String>,
    dimensions: Option<usize>,
}

#[derive(Serialize, Debug)]
struct PredictRequest<'a> {
    instances: [Instance<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Parameters>,
}

#[derive(Serialize, Debug)]
struct Instance<'a> {
    image: InlineImage<'a>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineImage<'a> {
    bytes_base64_encoded: String,
    mime_type: &'a str,
}

#[derive(Serialize, Debug)]
struct Parameters {
    dimension: usize,
}

#[derive(Deserialize, Debug)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    image_embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(
        endpoint: &str,
        bearer_token: Option<String>,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            bearer_token,
            dimensions,
        })
    }
}

impl EmbeddingClient for RemoteEmbedder {
    fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let body = PredictRequest {
            instances: [Instance {
                image: InlineImage {
                    bytes_base64_encoded: STANDARD.encode(image),
                    mime_type: sniff_mime(image),
                },
            }],
            parameters: self.dimensions.map(|dimension| Parameters { dimension }),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        log::debug!("requesting embedding from {}", self.endpoint);
        let response = request.send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response: PredictResponse = response.json()?;

        response
            .predictions
            .into_iter()
            .next()
            .map(|prediction| prediction.image_embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or(EmbeddingError::EmptyResponse)
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::{json, Value};

    /// Serve `router` on a random local port from a background runtime.
    fn serve(router: Router) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                    axum::serve(listener, router).await.unwrap();
                });
        });

        format!("http://{addr}/predict")
    }

    fn embedder(endpoint: &str, token: Option<&str>, dimensions: Option<usize>) -> RemoteEmbedder {
        RemoteEmbedder::new(
            endpoint,
            token.map(str::to_string),
            dimensions,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_embed_sends_image_and_parses_vector() {
        let router = Router::new().route(
            "/predict",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let image = &body["instances"][0]["image"];
                assert_eq!(image["bytesBase64Encoded"], json!("/9j/4A=="));
                assert_eq!(image["mimeType"], json!("image/jpeg"));
                assert_eq!(body["parameters"]["dimension"], json!(3));
                assert_eq!(
                    headers.get("authorization").unwrap().to_str().unwrap(),
                    "Bearer secret"
                );
                Json(json!({"predictions": [{"imageEmbedding": [0.25, -0.5, 1.0]}]}))
            }),
        );
        let endpoint = serve(router);

        let vector = embedder(&endpoint, Some("secret"), Some(3))
            .embed(&[0xFF, 0xD8, 0xFF, 0xE0])
            .unwrap();

        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn test_error_status_is_reported() {
        let router = Router::new().route(
            "/predict",
            post(|| async {
                (
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    "quota exceeded".to_string(),
                )
            }),
        );
        let endpoint = serve(router);

        let err = embedder(&endpoint, None, None).embed(b"img").unwrap_err();
        match err {
            EmbeddingError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_empty_predictions() {
        let router = Router::new().route(
            "/predict",
            post(|| async { Json(json!({"predictions": []})) }),
        );
        let endpoint = serve(router);

        let err = embedder(&endpoint, None, None).embed(b"img").unwrap_err();
        assert!(matches!(err, EmbeddingError::EmptyResponse));
    }

    #[test]
    fn test_unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = embedder(&format!("http://{addr}/predict"), None, None)
            .embed(b"img")
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Request(_)));
    }
}
