//! Road accident reporting: live incident map, report filtering and
//! analytics, CSV export, overlay tile rendering and an AI safety advisory.

pub mod advisory;
pub mod analytics;
pub mod config;
pub mod data;
pub mod export;
pub mod geolocation;
pub mod map;
pub mod pages;
pub mod render;
pub mod server;
pub mod types;
