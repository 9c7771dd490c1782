//! Client for the plate detector collaborator.
//!
//! The detector accepts a multipart upload with an `image` part and answers
//! with the boxes it found. Detectors that run OCR add the plate text to each
//! detection.

use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One detection reported by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detector confidence.
    pub confidence: f64,
    /// Plate text, when the detector read it.
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
    /// Bounding box `[x1, y1, x2, y2]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<[i64; 4]>,
}

/// Detector reply to one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorResponse {
    /// Detections in the image.
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Name of the annotated image the detector saved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_image: Option<String>,
}

/// HTTP client for the detector endpoint.
#[derive(Debug, Clone)]
pub struct DetectorClient {
    http: reqwest::Client,
    url: String,
}

impl DetectorClient {
    /// Build a client from configuration. Returns `None` when no detector
    /// URL is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &DetectorConfig) -> Result<Option<Self>> {
        let Some(url) = &config.url else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Detector(format!("failed to build HTTP client: {e}")))?;
        info!("Detector client targeting {url}");
        Ok(Some(Self {
            http,
            url: url.clone(),
        }))
    }

    /// Detector endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send an image to the detector.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the detector answers with a
    /// non-success status, or the reply cannot be decoded.
    pub async fn detect(
        &self,
        image: Bytes,
        file_name: &str,
        content_type: Option<&str>,
    ) -> Result<DetectorResponse> {
        let mut part = reqwest::multipart::Part::bytes(image.to_vec()).file_name(file_name.to_string());
        if let Some(content_type) = content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| Error::Detector(format!("invalid content type: {e}")))?;
        }
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .http
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Detector(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Detector(format!("detector returned {status}: {body}")));
        }

        let reply: DetectorResponse = response
            .json()
            .await
            .map_err(|e| Error::Detector(format!("invalid detector reply: {e}")))?;
        debug!(
            detections = reply.detections.len(),
            with_plate = reply.detections.iter().filter(|d| d.plate.is_some()).count(),
            "Detector replied"
        );
        Ok(reply)
    }
}
