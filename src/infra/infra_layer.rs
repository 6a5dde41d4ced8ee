// The infra module contains implementations of core traits.
// Each external system gets its own submodule.

#[path = "ai/mod.rs"]
pub mod ai;

#[path = "vision/mod.rs"]
pub mod vision;

#[path = "moderation/mod.rs"]
pub mod moderation;
