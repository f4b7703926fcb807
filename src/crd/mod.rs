pub mod cache;
pub mod common;
pub mod model;
pub mod model_source;
pub mod service;
pub mod template;
