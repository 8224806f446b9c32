//! The request loop and the context it runs with.

use std::{
    fmt,
    io::{BufRead, Write},
    path::Path,
    str::FromStr,
};

use image::{ImageFormat, RgbImage};
use log::{debug, info, warn};

use crate::{
    anomaly_map::AnomalyMap,
    encode::{encode_overlay, OverlayFormat},
    errors::{BridgeError, Result},
    postprocess::{evaluate, OverlayParams},
    protocol::{BlankLines, Command, Response},
    traits::AnomalyModel,
    Config,
};

/// How a frame reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Staging {
    /// Decoded once and handed to the model directly.
    #[default]
    InMemory,
    /// Written to a temporary PNG and decoded again before inference.
    TempFile,
}

impl fmt::Display for Staging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InMemory => "in-memory",
            Self::TempFile => "temp-file",
        })
    }
}

impl FromStr for Staging {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-memory" | "memory" => Ok(Self::InMemory),
            "temp-file" | "tempfile" => Ok(Self::TempFile),
            other => Err(format!(
                "invalid staging '{other}'; expected 'in-memory' or 'temp-file'"
            )),
        }
    }
}

/// Per-process options of the request loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub params: OverlayParams,
    pub staging: Staging,
    pub blank_lines: BlankLines,
    pub overlay_format: OverlayFormat,
    pub jpeg_quality: u8,
    /// `false` in non-interactive mode, where responses carry no overlay.
    pub include_overlay: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            params: OverlayParams::default(),
            staging: Staging::InMemory,
            blank_lines: BlankLines::Report,
            overlay_format: OverlayFormat::Jpeg,
            jpeg_quality: 90,
            include_overlay: true,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            params: config.overlay_params()?,
            staging: config.staging,
            blank_lines: config.blank_lines,
            overlay_format: config.overlay_format,
            jpeg_quality: config.jpeg_quality,
            include_overlay: !config.non_interactive,
        })
    }
}

/// Everything a request needs, built once before the loop starts.
pub struct RunContext<M: AnomalyModel> {
    model: M,
    options: SessionOptions,
}

impl<M: AnomalyModel> RunContext<M> {
    pub const fn new(model: M, options: SessionOptions) -> Self {
        Self { model, options }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Line printed once before the first request.
    pub fn banner(&self) -> String {
        match self.options.staging {
            Staging::InMemory => "Anomalib C# interface running (in-memory)".to_string(),
            Staging::TempFile => "Anomalib C# interface running (temp-file)".to_string(),
        }
    }

    /// Answer one image path. Every failure becomes an error record.
    pub fn handle_path(&self, path: &Path) -> Response {
        let frame = match image::open(path) {
            Ok(image) => image.into_rgb8(),
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                return Response::unreadable(path);
            }
        };

        match self.analyze(&frame) {
            Ok(response) => response,
            Err(e) => {
                warn!("request for {} failed: {e}", path.display());
                Response::error(error_message(&e))
            }
        }
    }

    /// Infer, post-process and encode one decoded frame.
    pub fn analyze(&self, frame: &RgbImage) -> Result<Response> {
        let staged;
        let frame = match self.options.staging {
            Staging::InMemory => frame,
            Staging::TempFile => {
                staged = stage_through_temp_file(frame)?;
                &staged
            }
        };

        let raw = self.model.infer(frame)?;
        let anomaly_map = AnomalyMap::try_from(raw)?;
        let evaluation = evaluate(frame, &anomaly_map, &self.options.params)?;

        let overlay = if self.options.include_overlay {
            Some(encode_overlay(
                &evaluation.overlay,
                self.options.overlay_format,
                self.options.jpeg_quality,
            )?)
        } else {
            None
        };

        Ok(Response::Success {
            status: evaluation.classification,
            score: evaluation.score,
            overlay,
        })
    }
}

/// Top-level message plus its source chain, e.g.
/// `Model error: ort operation failed: ...`.
fn error_message(err: &BridgeError) -> String {
    use std::error::Error;

    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn stage_through_temp_file(frame: &RgbImage) -> Result<RgbImage> {
    let file = tempfile::Builder::new()
        .prefix("anomaly-bridge-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| BridgeError::FileSystem {
            path: std::env::temp_dir(),
            operation: "creating staging file".to_string(),
            source: e,
        })?;
    let path = file.path();
    frame
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| BridgeError::ImageProcessing {
            path: path.display().to_string(),
            operation: "writing staging file".to_string(),
            source: Box::new(e),
        })?;
    let staged = image::open(path).map_err(|e| BridgeError::ImageProcessing {
        path: path.display().to_string(),
        operation: "reading staging file".to_string(),
        source: Box::new(e),
    })?;
    Ok(staged.into_rgb8())
}

/// Process `input` line by line until `exit` or end of input.
///
/// Each response is written and flushed before the next line is read. Returns
/// the last response written, if any.
pub fn run_loop<M, R, W>(
    ctx: &RunContext<M>,
    mut input: R,
    mut output: W,
) -> Result<Option<Response>>
where
    M: AnomalyModel,
    R: BufRead,
    W: Write,
{
    let mut last = None;
    let mut handled = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = input
            .read_until(b'\n', &mut buf)
            .map_err(|e| BridgeError::FileSystem {
                path: "<stdin>".into(),
                operation: "reading request line".to_string(),
                source: e,
            })?;
        if read == 0 {
            break;
        }

        let response = match std::str::from_utf8(&buf).map(Command::parse) {
            Ok(Command::Exit) => {
                info!("exit requested after {handled} request(s)");
                break;
            }
            Ok(Command::Blank) => match ctx.options.blank_lines {
                BlankLines::Skip => continue,
                BlankLines::Report => Response::empty_path(),
            },
            Ok(Command::Path(path)) => {
                debug!("request {}: {}", handled + 1, path.display());
                ctx.handle_path(&path)
            }
            Err(_) => {
                let lossy = String::from_utf8_lossy(&buf);
                warn!("request line is not valid UTF-8: {}", lossy.trim());
                Response::invalid_line(lossy.trim())
            }
        };

        write_response(&mut output, &response)?;
        handled += 1;
        last = Some(response);
    }

    Ok(last)
}

fn write_response<W: Write>(output: &mut W, response: &Response) -> Result<()> {
    let line = response.to_line()?;
    writeln!(output, "{line}")
        .and_then(|_| output.flush())
        .map_err(|e| BridgeError::FileSystem {
            path: "<stdout>".into(),
            operation: "writing response".to_string(),
            source: e,
        })
}

/// Persist the final response for callers that launched the process from a shell.
pub fn write_result_file(path: &Path, response: Option<&Response>) -> Result<()> {
    let contents = match response {
        Some(response) => response.to_line()?,
        None => "null".to_string(),
    };
    std::fs::write(path, contents).map_err(|e| BridgeError::FileSystem {
        path: path.to_path_buf(),
        operation: "writing result file".to_string(),
        source: e,
    })
}
