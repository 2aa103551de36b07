//! Configuration Module
//!
//! Plain options (serde-loadable) plus the hooks a caller may attach.
//! Configuration problems are reported before any part is processed.

mod hooks;

pub use hooks::{DebugEvent, DebugHook, Deny, FnFilter, FnNamer, PartFilter, UploadNamer};

use crate::coordinator::{PartMeta, PartRecord};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No upload path provided")]
    MissingUploadPath,

    #[error("Upload path is not a directory: {0}")]
    UploadPathNotDirectory(PathBuf),

    #[error("Invalid MIME type in allow-list: {0}")]
    InvalidMimeType(String),

    #[error("Failed to parse options: {0}")]
    Parse(String),
}

/// How accepted bytes reach storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Hold the whole part in memory and write it only after validation
    /// passes. Nothing rejected ever touches storage; memory grows with the
    /// largest concurrently accepted part.
    #[default]
    Buffered,
    /// Write chunks as they arrive and delete the partial file on a late
    /// rejection. Constant memory per part, extra disk I/O for rejects.
    Streaming,
}

/// Plain upload options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Destination directory (required)
    #[serde(alias = "uploadPath")]
    pub upload_path: PathBuf,

    /// Cap on file parts per request
    #[serde(alias = "maxAmount")]
    pub max_amount: Option<u64>,

    /// MIME allow-list; empty allows every type
    #[serde(alias = "mimeTypes")]
    pub mime_types: Vec<String>,

    /// Per-file byte cap
    #[serde(alias = "maxsize", alias = "maxSize")]
    pub max_size: Option<u64>,

    #[serde(alias = "writeMode")]
    pub write_mode: WriteMode,
}

impl UploadOptions {
    /// Load options from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Options plus hooks for one upload endpoint. Cheap to clone.
#[derive(Clone)]
pub struct UploadConfig {
    options: UploadOptions,
    namer: Option<Arc<dyn UploadNamer>>,
    filter: Option<Arc<dyn PartFilter>>,
    debug: Option<DebugHook>,
}

impl UploadConfig {
    /// Start a builder for the given upload directory
    pub fn builder(upload_path: impl Into<PathBuf>) -> UploadConfigBuilder {
        UploadConfigBuilder::new(UploadOptions {
            upload_path: upload_path.into(),
            ..UploadOptions::default()
        })
    }

    /// Build a hook-less configuration from plain options
    pub fn from_options(options: UploadOptions) -> Result<Self, ConfigError> {
        UploadConfigBuilder::new(options).build()
    }

    /// Check required options and the allow-list
    pub fn validate(&self) -> Result<(), ConfigError> {
        let path = &self.options.upload_path;
        if path.as_os_str().is_empty() {
            return Err(ConfigError::MissingUploadPath);
        }
        if path.exists() && !path.is_dir() {
            return Err(ConfigError::UploadPathNotDirectory(path.clone()));
        }

        for mime in &self.options.mime_types {
            let valid = mime
                .split_once('/')
                .is_some_and(|(kind, sub)| !kind.is_empty() && !sub.is_empty() && !sub.contains('/'));
            if !valid {
                return Err(ConfigError::InvalidMimeType(mime.clone()));
            }
        }

        Ok(())
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn upload_path(&self) -> &Path {
        &self.options.upload_path
    }

    pub fn max_amount(&self) -> Option<u64> {
        self.options.max_amount
    }

    pub fn max_size(&self) -> Option<u64> {
        self.options.max_size
    }

    pub fn mime_types(&self) -> &[String] {
        &self.options.mime_types
    }

    pub fn write_mode(&self) -> WriteMode {
        self.options.write_mode
    }

    pub fn filter(&self) -> Option<&Arc<dyn PartFilter>> {
        self.filter.as_ref()
    }

    /// Ask the naming hook for a stored base name
    pub async fn resolve_upload_name(&self, meta: &PartMeta) -> Option<String> {
        match &self.namer {
            Some(namer) => namer.upload_name(meta).await,
            None => None,
        }
    }

    /// Report a diagnostic event to tracing and to the debug hook
    pub fn emit_debug(&self, event: DebugEvent) {
        tracing::debug!(event = %event, "upload diagnostic");
        if let Some(hook) = &self.debug {
            hook(&event);
        }
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("options", &self.options)
            .field("namer", &self.namer.is_some())
            .field("filter", &self.filter.is_some())
            .field("debug", &self.debug.is_some())
            .finish()
    }
}

/// Builder for [`UploadConfig`]
pub struct UploadConfigBuilder {
    options: UploadOptions,
    namer: Option<Arc<dyn UploadNamer>>,
    filter: Option<Arc<dyn PartFilter>>,
    debug: Option<DebugHook>,
}

impl UploadConfigBuilder {
    fn new(options: UploadOptions) -> Self {
        Self {
            options,
            namer: None,
            filter: None,
            debug: None,
        }
    }

    /// Set the per-request part limit
    pub fn max_amount(mut self, max: u64) -> Self {
        self.options.max_amount = Some(max);
        self
    }

    /// Replace the MIME allow-list
    pub fn mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.mime_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-file byte limit
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.options.max_size = Some(bytes);
        self
    }

    pub fn write_mode(mut self, mode: WriteMode) -> Self {
        self.options.write_mode = mode;
        self
    }

    /// Naming closure `(meta) -> Option<name>`
    pub fn upload_name<F>(self, f: F) -> Self
    where
        F: Fn(&PartMeta) -> Option<String> + Send + Sync + 'static,
    {
        self.upload_namer(FnNamer(f))
    }

    /// Naming hook that may suspend
    pub fn upload_namer(mut self, namer: impl UploadNamer + 'static) -> Self {
        self.namer = Some(Arc::new(namer));
        self
    }

    /// Filter closure; call `deny.deny(reason)` to reject
    pub fn filter<F>(self, f: F) -> Self
    where
        F: Fn(&PartRecord, &mut Deny) + Send + Sync + 'static,
    {
        self.part_filter(FnFilter(f))
    }

    /// Filter hook that may suspend
    pub fn part_filter(mut self, filter: impl PartFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Diagnostic sink for non-fatal internal events
    pub fn debug<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DebugEvent) + Send + Sync + 'static,
    {
        self.debug = Some(Arc::new(hook));
        self
    }

    /// Validate and finish
    pub fn build(self) -> Result<UploadConfig, ConfigError> {
        let config = UploadConfig {
            options: self.options,
            namer: self.namer,
            filter: self.filter,
            debug: self.debug,
        };
        config.validate()?;
        Ok(config)
    }
}
