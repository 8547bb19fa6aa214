//! Pipeline orchestrator: runs the decoder, then the packager.
//!
//! Progress fractions:
//!   0.00-0.85: input plugin (header, text records, images)
//!   0.85-1.00: output plugin (packaging)

use std::path::Path;

use log::info;

use crate::cancel::CancellationToken;
use crate::diagnostics::LogCrateSink;
use crate::error::{MobiError, Result};
use crate::options::DecodeOptions;
use crate::plugin::{
    DecodeContext, ImageCodec, InputPlugin, Log, OutputPlugin, ProgressReporter, UnpackResult,
};

/// The unpack pipeline orchestrator.
pub struct Pipeline {
    input_plugin: Box<dyn InputPlugin>,
    output_plugin: Box<dyn OutputPlugin>,
    codec: Box<dyn ImageCodec>,
    log: Box<dyn Log>,
    cancel: CancellationToken,
    progress_reporter: Option<ProgressReporter>,
}

impl Pipeline {
    pub fn new(
        input_plugin: Box<dyn InputPlugin>,
        output_plugin: Box<dyn OutputPlugin>,
        codec: Box<dyn ImageCodec>,
    ) -> Self {
        Self {
            input_plugin,
            output_plugin,
            codec,
            log: Box::new(LogCrateSink),
            cancel: CancellationToken::new(),
            progress_reporter: None,
        }
    }

    /// Replace the diagnostics sink.
    pub fn set_log(&mut self, log: Box<dyn Log>) {
        self.log = log;
    }

    /// Set a progress reporter callback.
    pub fn set_progress_reporter(&mut self, reporter: ProgressReporter) {
        self.progress_reporter = Some(reporter);
    }

    /// Token that cancels this pipeline's runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Decode `input_path` and write all artifacts below `out_dir`.
    pub fn run(
        &self,
        input_path: &Path,
        out_dir: &Path,
        options: &DecodeOptions,
    ) -> Result<UnpackResult> {
        let mut ctx = DecodeContext::new(self.log.as_ref(), self.codec.as_ref())
            .with_cancel(self.cancel.clone());
        if let Some(ref reporter) = self.progress_reporter {
            ctx = ctx.with_progress(reporter);
        }

        ctx.report_progress(0.0, "Starting unpack...");
        info!("Running {} input plugin...", self.input_plugin.name());

        let book = self.input_plugin.convert(input_path, options, &ctx)?;
        ctx.check_cancelled()?;
        ctx.report_progress(0.85, "Decoding complete");

        info!("Running {} output plugin...", self.output_plugin.name());
        let result = self.output_plugin.write(&book, out_dir, options, &ctx)?;

        ctx.report_progress(1.0, "Unpack complete");
        info!(
            "Unpacked {} ({} images) to {}",
            input_path.display(),
            result.images.len(),
            out_dir.display()
        );

        Ok(result)
    }
}

/// Builder for constructing a pipeline.
pub struct PipelineBuilder {
    input_plugin: Option<Box<dyn InputPlugin>>,
    output_plugin: Option<Box<dyn OutputPlugin>>,
    codec: Option<Box<dyn ImageCodec>>,
    log: Option<Box<dyn Log>>,
    cancel: Option<CancellationToken>,
    progress_reporter: Option<ProgressReporter>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            input_plugin: None,
            output_plugin: None,
            codec: None,
            log: None,
            cancel: None,
            progress_reporter: None,
        }
    }

    pub fn input(mut self, plugin: Box<dyn InputPlugin>) -> Self {
        self.input_plugin = Some(plugin);
        self
    }

    pub fn output(mut self, plugin: Box<dyn OutputPlugin>) -> Self {
        self.output_plugin = Some(plugin);
        self
    }

    pub fn image_codec(mut self, codec: Box<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn log(mut self, log: Box<dyn Log>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn progress_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let input_plugin = self
            .input_plugin
            .ok_or_else(|| MobiError::Pipeline("No input plugin specified".to_string()))?;
        let output_plugin = self
            .output_plugin
            .ok_or_else(|| MobiError::Pipeline("No output plugin specified".to_string()))?;
        let codec = self
            .codec
            .ok_or_else(|| MobiError::Pipeline("No image codec specified".to_string()))?;

        let mut pipeline = Pipeline::new(input_plugin, output_plugin, codec);
        if let Some(log) = self.log {
            pipeline.set_log(log);
        }
        if let Some(token) = self.cancel {
            pipeline.cancel = token;
        }
        if let Some(reporter) = self.progress_reporter {
            pipeline.set_progress_reporter(reporter);
        }
        Ok(pipeline)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
