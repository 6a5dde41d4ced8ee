// =============================================================================
// VISION CLIENT - Google Cloud Vision API Integration
// =============================================================================
//
// Implementation of the `ImageAnnotator` port over the `images:annotate`
// endpoint (https://cloud.google.com/vision/docs/reference/rest).
//
// Each call requests label detection, safe-search ratings, image properties
// and object localization for one image. Remote references (`http(s)://`,
// `gs://`) are passed as `imageUri`. Local references (bare paths, `file://`)
// are only read when a `LocalImageRoot` is configured: they must resolve to a
// regular file inside that directory, no larger than its size cap, and are
// sent inline as base64. Without a root every local reference fails.
//
// **Authentication Options:**
// - `VISION_API_KEY` - API key sent in the `x-goog-api-key` header
// - Service account (see `service_account.rs`) - Bearer token
//
// **Local images:**
// - `VISION_LOCAL_IMAGE_ROOT` - Directory local references are confined to
// - `VISION_MAX_LOCAL_IMAGE_BYTES` - Size cap for one local image

use super::service_account::ServiceAccountAuth;
use crate::core::moderation::{ImageAnnotation, ImageAnnotator, Likelihood, SafeSearch};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;

const VISION_ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

const MAX_LABELS: u32 = 10;
const MAX_OBJECTS: u32 = 5;

/// Default cap for one inline image. Vision rejects larger request bodies anyway.
pub const DEFAULT_MAX_LOCAL_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

// =============================================================================
// REQUEST STRUCTURES
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageSource {
    image_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<ImageSource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    feature_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest {
    image: Image,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct BatchAnnotateImagesRequest {
    requests: Vec<AnnotateImageRequest>,
}

fn moderation_features() -> Vec<Feature> {
    vec![
        Feature {
            feature_type: "LABEL_DETECTION",
            max_results: Some(MAX_LABELS),
        },
        Feature {
            feature_type: "SAFE_SEARCH_DETECTION",
            max_results: None,
        },
        Feature {
            feature_type: "IMAGE_PROPERTIES",
            max_results: None,
        },
        Feature {
            feature_type: "OBJECT_LOCALIZATION",
            max_results: Some(MAX_OBJECTS),
        },
    ]
}

fn is_remote(image_ref: &str) -> bool {
    let lower = image_ref.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("gs://")
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

fn likelihood_of(safe_search: &Value, key: &str) -> Likelihood {
    safe_search
        .get(key)
        .and_then(Value::as_str)
        .map(Likelihood::parse)
        .unwrap_or_default()
}

/// Label descriptions. Prefers `labelAnnotations`, otherwise the first array
/// field whose items carry a `description`.
fn labels_of(response: &Value) -> Vec<String> {
    let descriptions = |items: &Vec<Value>| -> Vec<String> {
        items
            .iter()
            .filter_map(|item| item.get("description").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    };

    if let Some(items) = response.get("labelAnnotations").and_then(Value::as_array) {
        return descriptions(items);
    }

    response
        .as_object()
        .into_iter()
        .flat_map(|map| map.values())
        .filter_map(Value::as_array)
        .find(|items| items.iter().any(|item| item.get("description").is_some()))
        .map(descriptions)
        .unwrap_or_default()
}

/// Turn one entry of the `responses` array into an annotation.
///
/// A per-image `error` object counts as a failed call.
pub fn parse_annotation(response: &Value) -> Result<ImageAnnotation, Box<dyn Error + Send + Sync>> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(format!("Vision API image error: {}", message).into());
    }

    let safe_search = response
        .get("safeSearchAnnotation")
        .filter(|v| v.is_object())
        .map(|ss| SafeSearch {
            adult: likelihood_of(ss, "adult"),
            violence: likelihood_of(ss, "violence"),
            racy: likelihood_of(ss, "racy"),
        });

    let objects = response
        .get("localizedObjectAnnotations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(ImageAnnotation {
        labels: labels_of(response),
        safe_search,
        has_properties: response
            .get("imagePropertiesAnnotation")
            .map(|v| !v.is_null())
            .unwrap_or(false),
        objects,
        raw: response.clone(),
    })
}

// =============================================================================
// LOCAL IMAGES
// =============================================================================

/// Directory that local image references are confined to.
#[derive(Debug, Clone)]
pub struct LocalImageRoot {
    /// Canonical path, so containment checks compare like with like
    dir: PathBuf,
    max_bytes: u64,
}

impl LocalImageRoot {
    pub fn new(dir: impl AsRef<Path>, max_bytes: u64) -> std::io::Result<Self> {
        let dir = std::fs::canonicalize(dir)?;
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", dir.display()),
            ));
        }
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a local reference. Relative paths resolve against the root;
    /// symlinks and `..` are resolved before the containment check.
    async fn read(&self, image_ref: &str) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        let raw = image_ref.strip_prefix("file://").unwrap_or(image_ref);
        let path = tokio::fs::canonicalize(self.dir.join(raw))
            .await
            .map_err(|e| format!("Failed to resolve image '{}': {}", image_ref, e))?;

        if !path.starts_with(&self.dir) {
            return Err(format!("Image '{}' is outside the local image root", image_ref).into());
        }

        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(format!("Image '{}' is not a regular file", image_ref).into());
        }
        if metadata.len() > self.max_bytes {
            return Err(format!(
                "Image '{}' is {} bytes, over the {} byte limit",
                image_ref,
                metadata.len(),
                self.max_bytes
            )
            .into());
        }

        // The file may grow after the metadata check
        let file = tokio::fs::File::open(&path).await?;
        let mut bytes = Vec::with_capacity(metadata.len() as usize);
        file.take(self.max_bytes + 1).read_to_end(&mut bytes).await?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(format!("Image '{}' is over the {} byte limit", image_ref, self.max_bytes).into());
        }

        Ok(bytes)
    }
}

// =============================================================================
// VISION CLIENT IMPLEMENTATION
// =============================================================================

enum VisionAuth {
    ApiKey(String),
    ServiceAccount(ServiceAccountAuth),
}

pub struct VisionClient {
    client: Client,
    auth: VisionAuth,
    local_images: Option<LocalImageRoot>,
}

impl VisionClient {
    fn http_client(request_timeout: Duration) -> Client {
        Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build Vision HTTP client, using defaults");
                Client::new()
            })
    }

    pub fn with_api_key(api_key: String, request_timeout: Duration) -> Self {
        Self {
            client: Self::http_client(request_timeout),
            auth: VisionAuth::ApiKey(api_key),
            local_images: None,
        }
    }

    pub fn with_service_account(auth: ServiceAccountAuth, request_timeout: Duration) -> Self {
        Self {
            client: Self::http_client(request_timeout),
            auth: VisionAuth::ServiceAccount(auth),
            local_images: None,
        }
    }

    /// Allow local references, confined to `root`.
    pub fn with_local_images(mut self, root: LocalImageRoot) -> Self {
        self.local_images = Some(root);
        self
    }

    async fn image_for(&self, image_ref: &str) -> Result<Image, Box<dyn Error + Send + Sync>> {
        if is_remote(image_ref) {
            return Ok(Image {
                content: None,
                source: Some(ImageSource {
                    image_uri: image_ref.to_string(),
                }),
            });
        }

        let root = self.local_images.as_ref().ok_or_else(|| {
            format!(
                "Local image '{}' rejected: VISION_LOCAL_IMAGE_ROOT is not configured",
                image_ref
            )
        })?;
        let bytes = root.read(image_ref).await?;
        Ok(Image {
            content: Some(STANDARD.encode(bytes)),
            source: None,
        })
    }
}

#[async_trait]
impl ImageAnnotator for VisionClient {
    async fn annotate(
        &self,
        image_ref: &str,
    ) -> Result<ImageAnnotation, Box<dyn Error + Send + Sync>> {
        if let VisionAuth::ApiKey(key) = &self.auth {
            if key.trim().is_empty() {
                return Err("VISION_API_KEY is not configured".into());
            }
        }

        let request = BatchAnnotateImagesRequest {
            requests: vec![AnnotateImageRequest {
                image: self.image_for(image_ref).await?,
                features: moderation_features(),
            }],
        };

        let builder = self.client.post(VISION_ANNOTATE_URL).json(&request);
        let builder = match &self.auth {
            VisionAuth::ApiKey(key) => builder.header("x-goog-api-key", key),
            VisionAuth::ServiceAccount(auth) => builder.bearer_auth(auth.get_access_token().await?),
        };

        tracing::debug!(image = %image_ref, "Sending Vision annotate request");
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(format!("Vision API error ({}): {}", status, text).into());
        }

        let body: Value = response.json().await?;
        let first = body
            .get("responses")
            .and_then(Value::as_array)
            .and_then(|responses| responses.first())
            .ok_or("Vision API returned no responses")?;

        parse_annotation(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = BatchAnnotateImagesRequest {
            requests: vec![AnnotateImageRequest {
                image: Image {
                    content: None,
                    source: Some(ImageSource {
                        image_uri: "gs://bucket/shirt.jpg".to_string(),
                    }),
                },
                features: moderation_features(),
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        let req = &json["requests"][0];
        assert_eq!(req["image"]["source"]["imageUri"], "gs://bucket/shirt.jpg");
        assert!(req["image"].get("content").is_none());
        assert_eq!(req["features"][0]["type"], "LABEL_DETECTION");
        assert_eq!(req["features"][0]["maxResults"], 10);
        assert!(req["features"][1].get("maxResults").is_none());
        assert_eq!(req["features"][3]["maxResults"], 5);
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_fast() {
        let client = VisionClient::with_api_key(String::new(), Duration::from_secs(1));
        assert!(client.annotate("https://cdn.example.com/a.jpg").await.is_err());
    }

    #[test]
    fn test_remote_detection() {
        assert!(is_remote("https://cdn.example.com/a.jpg"));
        assert!(is_remote("GS://bucket/a.jpg"));
        assert!(!is_remote("uploads/a.jpg"));
    }

    fn client() -> VisionClient {
        VisionClient::with_api_key("test-key".to_string(), Duration::from_secs(1))
    }

    fn client_with_root(dir: &Path, max_bytes: u64) -> VisionClient {
        client().with_local_images(LocalImageRoot::new(dir, max_bytes).unwrap())
    }

    #[tokio::test]
    async fn test_remote_image_sent_by_uri() {
        let image = client().image_for("https://cdn.example.com/a.jpg").await.unwrap();
        assert!(image.content.is_none());
        assert_eq!(image.source.unwrap().image_uri, "https://cdn.example.com/a.jpg");
    }

    #[tokio::test]
    async fn test_local_image_sent_inline() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shirt.jpg");
        std::fs::write(&file, b"abc").unwrap();
        let client = client_with_root(dir.path(), DEFAULT_MAX_LOCAL_IMAGE_BYTES);

        let image = client.image_for("shirt.jpg").await.unwrap();
        assert_eq!(image.content.as_deref(), Some("YWJj"));
        assert!(image.source.is_none());

        let absolute = client.image_for(file.to_str().unwrap()).await.unwrap();
        assert_eq!(absolute.content.as_deref(), Some("YWJj"));

        let url = format!("file://{}", file.to_str().unwrap());
        let image = client.image_for(&url).await.unwrap();
        assert_eq!(image.content.as_deref(), Some("YWJj"));

        assert!(client.image_for("missing.jpg").await.is_err());
    }

    #[tokio::test]
    async fn test_local_images_disabled_without_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shirt.jpg");
        std::fs::write(&file, b"abc").unwrap();

        let err = client().image_for(file.to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("VISION_LOCAL_IMAGE_ROOT"));
        assert!(client().image_for("/proc/self/environ").await.is_err());
        assert!(client().image_for("file:///etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_local_image_outside_root_rejected() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("uploads");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(parent.path().join("secret.txt"), b"token").unwrap();
        let client = client_with_root(&root, DEFAULT_MAX_LOCAL_IMAGE_BYTES);

        for image_ref in [
            "/proc/self/environ".to_string(),
            "file:///etc/passwd".to_string(),
            "../secret.txt".to_string(),
            parent.path().join("secret.txt").to_str().unwrap().to_string(),
        ] {
            assert!(client.image_for(&image_ref).await.is_err(), "{}", image_ref);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_rejected() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("uploads");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(parent.path().join("secret.txt"), b"token").unwrap();
        std::os::unix::fs::symlink(parent.path().join("secret.txt"), root.join("link.jpg"))
            .unwrap();
        let client = client_with_root(&root, DEFAULT_MAX_LOCAL_IMAGE_BYTES);

        assert!(client.image_for("link.jpg").await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_or_non_file_local_image_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.jpg"), vec![0u8; 64]).unwrap();
        std::fs::write(dir.path().join("small.jpg"), vec![0u8; 16]).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let client = client_with_root(dir.path(), 32);

        let err = client.image_for("big.jpg").await.unwrap_err();
        assert!(err.to_string().contains("limit"));
        assert!(client.image_for("small.jpg").await.is_ok());
        assert!(client.image_for("nested").await.is_err());
    }

    #[test]
    fn test_local_root_must_be_a_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(LocalImageRoot::new(file.path(), 1024).is_err());
        assert!(LocalImageRoot::new("/definitely/not/here", 1024).is_err());

        let dir = tempfile::tempdir().unwrap();
        let root = LocalImageRoot::new(dir.path(), 1024).unwrap();
        assert_eq!(root.dir(), std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_parse_full_annotation() {
        let response = json!({
            "labelAnnotations": [
                {"description": "T-shirt", "score": 0.97},
                {"description": "Sleeve", "score": 0.9}
            ],
            "safeSearchAnnotation": {
                "adult": "VERY_UNLIKELY",
                "violence": "LIKELY",
                "racy": "POSSIBLE"
            },
            "imagePropertiesAnnotation": {"dominantColors": {"colors": []}},
            "localizedObjectAnnotations": [{"name": "Shirt", "score": 0.8}]
        });

        let annotation = parse_annotation(&response).unwrap();
        assert_eq!(annotation.labels, vec!["T-shirt", "Sleeve"]);
        assert_eq!(annotation.objects, vec!["Shirt"]);
        assert!(annotation.has_properties);

        let safe = annotation.safe_search.unwrap();
        assert_eq!(safe.adult, Likelihood::VeryUnlikely);
        assert!(safe.violence.is_likely());
        assert!(!safe.racy.is_likely());
        assert_eq!(annotation.raw, response);
    }

    #[test]
    fn test_parse_falls_back_to_any_described_array() {
        let response = json!({
            "webDetection": {"bestGuessLabels": []},
            "otherAnnotations": [{"description": "Knife"}]
        });

        let annotation = parse_annotation(&response).unwrap();
        assert_eq!(annotation.labels, vec!["Knife"]);
        assert!(annotation.safe_search.is_none());
        assert!(!annotation.has_properties);
    }

    #[test]
    fn test_parse_empty_response() {
        let annotation = parse_annotation(&json!({})).unwrap();
        assert!(annotation.labels.is_empty());
        assert!(annotation.objects.is_empty());
        assert!(annotation.safe_search.is_none());
    }

    #[test]
    fn test_per_image_error_is_failure() {
        let response = json!({"error": {"code": 3, "message": "Bad image data."}});
        let err = parse_annotation(&response).unwrap_err();
        assert!(err.to_string().contains("Bad image data."));
    }
}
