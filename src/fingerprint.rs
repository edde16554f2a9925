//! Render-parameter fingerprinting
//!
//! The fingerprint is the cache key: a SHA-256 digest over the byte
//! concatenation of source, format, orientation and the margin formatted with
//! two fractional digits, prefixed with `pdfcache:`. Field order and
//! formatting are load-bearing; changing either requires bumping the prefix
//! so stale cache entries cannot be served.

use sha2::{Digest, Sha256};

use crate::params::RenderParams;

const KEY_PREFIX: &str = "pdfcache:";

/// Compute the cache key for the given parameters.
pub fn cache_key(params: &RenderParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(params.source.as_bytes());
    hasher.update(params.format.as_bytes());
    hasher.update(params.orientation.as_bytes());
    hasher.update(format!("{:.2}", params.margin).as_bytes());
    format!("{}{}", KEY_PREFIX, hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{PaperSize, Source};

    fn params(source: Source) -> RenderParams {
        RenderParams {
            source,
            format: "A4".to_string(),
            orientation: "portrait".to_string(),
            margin: 0.4,
            filename: "output.pdf".to_string(),
            paper: PaperSize::new(8.27, 11.69),
        }
    }

    #[test]
    fn deterministic_for_identical_params() {
        let a = params(Source::Html("<html>hello world</html>".to_string()));
        let b = params(Source::Html("<html>hello world</html>".to_string()));
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn matches_explicit_concatenation() {
        let p = params(Source::Url("https://example.com".to_string()));

        let mut hasher = Sha256::new();
        hasher.update(b"https://example.com");
        hasher.update(b"A4");
        hasher.update(b"portrait");
        hasher.update(b"0.40");
        let expected = format!("pdfcache:{}", hex::encode(hasher.finalize()));

        assert_eq!(cache_key(&p), expected);
    }

    #[test]
    fn any_covered_field_changes_the_key() {
        let base = params(Source::Html("<html>hello world</html>".to_string()));
        let key = cache_key(&base);

        let mut other = base.clone();
        other.source = Source::Html("<html>hello there</html>".to_string());
        assert_ne!(cache_key(&other), key);

        let mut other = base.clone();
        other.format = "LETTER".to_string();
        assert_ne!(cache_key(&other), key);

        let mut other = base.clone();
        other.orientation = "landscape".to_string();
        assert_ne!(cache_key(&other), key);

        let mut other = base.clone();
        other.margin = 0.5;
        assert_ne!(cache_key(&other), key);
    }

    #[test]
    fn margin_uses_two_fractional_digits() {
        let a = params(Source::Html("<html>hello world</html>".to_string()));
        let mut b = a.clone();
        // Differs only past the second fractional digit.
        b.margin = 0.4001;
        assert_eq!(cache_key(&a), cache_key(&b));
    }
}
