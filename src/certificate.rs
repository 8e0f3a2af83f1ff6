//! Registration-certificate decoding: the registry returns the certificate as
//! a base64 PDF; the registration start date sits in a fixed phrase of the
//! certificate text.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use base64::prelude::*;
use regex::Regex;

// Two spaces on each side of the date, as rendered in the certificate body.
static CERT_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"commencing from {2}([0-9/]+) {2}and ending").unwrap());

/// Registration start date from a base64-encoded certificate PDF payload.
pub fn certificate_date(payload: &str) -> Result<String> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64_STANDARD
        .decode(compact.as_bytes())
        .context("certificate payload is not valid base64")?;

    let doc = lopdf::Document::load_mem(&bytes).context("certificate PDF did not parse")?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let text = doc
        .extract_text(&pages)
        .context("certificate PDF has no extractable text")?;

    date_from_text(&text).context("no commencement date in certificate text")
}

fn date_from_text(text: &str) -> Option<String> {
    let flat = text.replace('\u{a0}', " ").replace('\n', "");
    CERT_DATE_RE
        .captures(&flat)
        .map(|caps| caps[1].to_string())
}
