//! `genpod-worker` library crate.
//!
//! Runs ComfyUI image-generation jobs: validates the job input, uploads
//! reference images, submits the workflow, follows it to completion over
//! the event channel and returns the generated images base64-encoded.
//! The binary entrypoint lives in `main.rs`.

pub mod collector;
pub mod config;
pub mod error;
pub mod handler;
pub mod input;
pub mod upload;
