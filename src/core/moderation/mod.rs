// Core moderation module - scores new marketplace listings.
// Following the same pattern as the other core modules: models, ports, services.

pub mod analysis_parsing;
pub mod image_analyzer;
pub mod moderation_config;
pub mod moderation_models;
pub mod moderation_service;
pub mod rule_matcher;
pub mod scoring;
pub mod text_analyzer;

pub use image_analyzer::{ImageAnnotation, ImageAnnotator, Likelihood, SafeSearch};
pub use moderation_config::{load_policy_file, ModerationConfig};
pub use moderation_models::*;
pub use moderation_service::{ModerationError, ModerationService, ModerationStore};
