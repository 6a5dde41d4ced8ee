pub mod service_account;
pub mod vision_client;

pub use service_account::{ServiceAccountAuth, CLOUD_VISION_SCOPE};
pub use vision_client::{LocalImageRoot, VisionClient, DEFAULT_MAX_LOCAL_IMAGE_BYTES};
