//! Request parameter validation
//!
//! Turns raw form or query fields into a fully-resolved [`RenderParams`]:
//! paper size looked up and orientation applied, margin parsed and bounded,
//! filename checked. Validation failures map to 400 (413 for oversized HTML)
//! with messages that are safe to return to the client.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;
use crate::error::AppError;

/// Default margin in inches when the request does not specify one.
pub const DEFAULT_MARGIN: f64 = 0.4;

/// Minimum accepted inline HTML length in bytes.
const MIN_HTML_BYTES: usize = 10;

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+\.pdf$").expect("filename regex"));

/// Paper dimensions in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaperSize {
    pub width: f64,
    pub height: f64,
}

impl PaperSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Swap width and height for landscape output.
    fn rotated(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

/// Document source: inline markup or a remote page.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Html(String),
    Url(String),
}

impl Source {
    /// The bytes that feed the cache fingerprint.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Source::Html(html) => html.as_bytes(),
            Source::Url(url) => url.as_bytes(),
        }
    }
}

/// Fully-resolved parameters for a single render. Immutable per request.
#[derive(Debug, Clone)]
pub struct RenderParams {
    pub source: Source,
    /// Uppercase paper name, or empty when the default paper applies.
    pub format: String,
    /// `"portrait"`, `"landscape"`, or empty (portrait).
    pub orientation: String,
    /// Uniform margin in inches.
    pub margin: f64,
    pub filename: String,
    /// Final paper with orientation already applied.
    pub paper: PaperSize,
}

/// Validate form fields for an inline-HTML conversion.
pub fn from_html_form(
    fields: &HashMap<String, String>,
    cfg: &Config,
) -> Result<RenderParams, AppError> {
    let html = fields.get("html").map(String::as_str).unwrap_or("");

    if html.len() < MIN_HTML_BYTES {
        return Err(AppError::Validation(
            "Invalid HTML: content too short or missing".to_string(),
        ));
    }
    if html.len() > cfg.limits.max_html_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "HTML input exceeds {} bytes",
            cfg.limits.max_html_bytes
        )));
    }

    resolve(Source::Html(html.to_string()), fields, cfg)
}

/// Validate query parameters for a URL conversion.
pub fn from_url_query(
    query: &HashMap<String, String>,
    cfg: &Config,
) -> Result<RenderParams, AppError> {
    let url = query.get("url").map(String::as_str).unwrap_or("");
    if url.is_empty() {
        return Err(AppError::Validation("Invalid URL: missing".to_string()));
    }

    let parsed = Url::parse(url)
        .map_err(|_| AppError::Validation("Invalid URL: must be HTTP or HTTPS".to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::Validation(
            "Invalid URL: must be HTTP or HTTPS".to_string(),
        ));
    }

    resolve(Source::Url(url.to_string()), query, cfg)
}

/// Shared validation of format, orientation, margin and filename, then paper
/// resolution.
fn resolve(
    source: Source,
    fields: &HashMap<String, String>,
    cfg: &Config,
) -> Result<RenderParams, AppError> {
    let format = fields
        .get("format")
        .map(|f| f.to_uppercase())
        .unwrap_or_default();
    if !format.is_empty() && !cfg.pdf.paper_sizes.contains_key(&format) {
        return Err(AppError::Validation(
            "Invalid format: not supported".to_string(),
        ));
    }

    let orientation = fields
        .get("orientation")
        .map(|o| o.to_lowercase())
        .unwrap_or_default();
    if !orientation.is_empty() && orientation != "portrait" && orientation != "landscape" {
        return Err(AppError::Validation(
            "Invalid orientation: must be 'portrait' or 'landscape'".to_string(),
        ));
    }

    let mut margin = DEFAULT_MARGIN;
    if let Some(raw) = fields.get("margin").filter(|m| !m.is_empty()) {
        margin = match raw.parse::<f64>() {
            Ok(m) if (0.1..=2.0).contains(&m) => m,
            _ => {
                return Err(AppError::Validation(
                    "Invalid margin: must be a float between 0.1 and 2.0".to_string(),
                ))
            }
        };
    }

    let filename = match fields.get("filename").filter(|f| !f.is_empty()) {
        None => "output.pdf".to_string(),
        Some(name) => {
            if !name.ends_with(".pdf") {
                return Err(AppError::Validation(
                    "Filename must end with .pdf".to_string(),
                ));
            }
            if !FILENAME_RE.is_match(name) {
                return Err(AppError::Validation(
                    "Filename contains invalid characters".to_string(),
                ));
            }
            name.clone()
        }
    };

    let mut paper = match cfg.pdf.paper_sizes.get(&format) {
        Some(paper) => *paper,
        None => *cfg
            .pdf
            .paper_sizes
            .get(&cfg.pdf.default_paper)
            .ok_or_else(|| AppError::Internal("Default paper size not configured".to_string()))?,
    };

    if orientation == "landscape" {
        paper = paper.rotated();
    }

    Ok(RenderParams {
        source,
        format,
        orientation,
        margin,
        filename,
        paper,
    })
}
