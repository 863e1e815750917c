pub mod catalog;
pub mod codec;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod textutil;
