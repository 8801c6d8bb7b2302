//! Static Site Templates
//!
//! Pure rendering of a coin's landing page into `index.html`, `styles.css` and
//! `script.js`. Rendering is deterministic: the same template and content always
//! yield byte-identical output, so a preview and the final download match.

mod classic;
mod minimal;
mod neon;

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest accepted ticker
pub const MAX_TICKER_LEN: usize = 10;

/// Available templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateId {
    Classic,
    Neon,
    Minimal,
}

impl TemplateId {
    pub const ALL: [TemplateId; 3] = [TemplateId::Classic, TemplateId::Neon, TemplateId::Minimal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Neon => "neon",
            Self::Minimal => "minimal",
        }
    }

    /// Names accepted from older clients
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Classic => &["template1", "default"],
            Self::Neon => &["template2", "cyber"],
            Self::Minimal => &["template3", "clean"],
        }
    }

    fn renderer(&self) -> fn(&SiteContent) -> SiteBundle {
        match self {
            Self::Classic => classic::render,
            Self::Neon => neon::render,
            Self::Minimal => minimal::render,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Ticker must be at most 10 characters")]
    TickerTooLong,
    #[error("Invalid color {0}, expected #rgb or #rrggbb")]
    InvalidColor(String),
    #[error("Invalid link for {field}: {value}")]
    InvalidLink { field: &'static str, value: String },
}

/// Lookup table from every accepted name to its template, built once at startup
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    names: BTreeMap<String, TemplateId>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry {
    pub fn new() -> Self {
        let mut names = BTreeMap::new();
        for id in TemplateId::ALL {
            names.insert(id.as_str().to_string(), id);
            for alias in id.aliases() {
                names.insert(alias.to_string(), id);
            }
        }
        Self { names }
    }

    /// Resolve a canonical id or alias, case-insensitively
    pub fn resolve(&self, name: &str) -> Result<TemplateId, RenderError> {
        self.names
            .get(&name.trim().to_lowercase())
            .copied()
            .ok_or_else(|| RenderError::UnknownTemplate(name.to_string()))
    }

    pub fn render(&self, name: &str, content: &SiteContent) -> Result<SiteBundle, RenderError> {
        render(self.resolve(name)?, content)
    }

    /// Canonical ids with their aliases
    pub fn catalog(&self) -> Vec<TemplateInfo> {
        TemplateId::ALL
            .iter()
            .map(|id| TemplateInfo {
                id: *id,
                aliases: id.aliases().iter().map(|a| a.to_string()).collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub id: TemplateId,
    pub aliases: Vec<String>,
}

fn default_accent() -> String {
    "#f7b500".to_string()
}

/// Everything a landing page shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteContent {
    pub coin_name: String,
    pub ticker: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub twitter_url: Option<String>,
    #[serde(default)]
    pub telegram_url: Option<String>,
    #[serde(default)]
    pub buy_url: Option<String>,
    #[serde(default = "default_accent")]
    pub accent_color: String,
}

impl SiteContent {
    pub fn new(coin_name: &str, ticker: &str) -> Self {
        Self {
            coin_name: coin_name.to_string(),
            ticker: ticker.to_string(),
            description: String::new(),
            contract_address: None,
            logo_url: None,
            twitter_url: None,
            telegram_url: None,
            buy_url: None,
            accent_color: default_accent(),
        }
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.coin_name.trim().is_empty() {
            return Err(RenderError::MissingField("coin_name"));
        }
        if self.ticker.trim().is_empty() {
            return Err(RenderError::MissingField("ticker"));
        }
        if self.ticker.trim().chars().count() > MAX_TICKER_LEN {
            return Err(RenderError::TickerTooLong);
        }
        if !is_hex_color(&self.accent_color) {
            return Err(RenderError::InvalidColor(self.accent_color.clone()));
        }
        for (field, value) in [
            ("logo_url", &self.logo_url),
            ("twitter_url", &self.twitter_url),
            ("telegram_url", &self.telegram_url),
            ("buy_url", &self.buy_url),
        ] {
            if let Some(value) = value {
                if !is_http_link(value) {
                    return Err(RenderError::InvalidLink {
                        field,
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Ticker as displayed: trimmed, upper-case, `$`-prefixed
    pub(crate) fn display_ticker(&self) -> String {
        format!("${}", self.ticker.trim().trim_start_matches('$').to_uppercase())
    }

    /// Social and trading links that are present, in display order
    pub(crate) fn links(&self) -> Vec<(&'static str, &str)> {
        [
            ("Buy", self.buy_url.as_deref()),
            ("Twitter", self.twitter_url.as_deref()),
            ("Telegram", self.telegram_url.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, url)| url.map(|u| (label, u)))
        .collect()
    }
}

/// Rendered site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteBundle {
    pub html: String,
    pub css: String,
    pub js: String,
}

impl SiteBundle {
    /// File name and contents for each blob
    pub fn files(&self) -> [(&'static str, &str); 3] {
        [
            ("index.html", self.html.as_str()),
            ("styles.css", self.css.as_str()),
            ("script.js", self.js.as_str()),
        ]
    }

    /// SHA-256 over the three blobs, hex encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, body) in self.files() {
            hasher.update(name.as_bytes());
            hasher.update((body.len() as u64).to_be_bytes());
            hasher.update(body.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Render `content` with `template`
pub fn render(template: TemplateId, content: &SiteContent) -> Result<SiteBundle, RenderError> {
    content.validate()?;
    Ok((template.renderer())(content))
}

// === Helpers shared by the templates ===

/// Escape text for HTML element and attribute contexts
pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Encode a string as a JavaScript string literal
pub(crate) fn js_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Description paragraphs split on blank lines
pub(crate) fn paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(escape_html)
        .collect()
}

fn is_hex_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

fn is_http_link(url: &str) -> bool {
    let url = url.trim();
    (url.starts_with("https://") || url.starts_with("http://"))
        && url.len() > "https://".len()
        && !url.chars().any(|c| c.is_whitespace() || c == '"' || c == '<' || c == '>')
}
