//! HTML email bodies built from templates with `[[key]]` placeholders.

use std::{fmt::Write as _, path::Path};

use regex::Regex;

use crate::error::TemplateError;

const SENT_INVOICES: &str = include_str!("../assets/sent_invoices_email_template.html");
const CREATED_INVOICES: &str = include_str!("../assets/created_invoices_email_template.html");

pub struct HtmlTemplate {
    source: String,
    token: Regex,
}

impl HtmlTemplate {
    /// # Errors
    ///
    /// Only if the placeholder pattern fails to compile.
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateError> {
        Ok(Self {
            source: source.into(),
            token: Regex::new(r"\[\[(.*?)\]\]")?,
        })
    }

    /// # Errors
    ///
    /// [`TemplateError::Io`] if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(source)
    }

    /// Summary of invoices sent today.
    ///
    /// # Errors
    ///
    /// See [`HtmlTemplate::new`].
    pub fn sent_invoices() -> Result<Self, TemplateError> {
        Self::new(SENT_INVOICES)
    }

    /// Summary of invoices created for a billing period.
    ///
    /// # Errors
    ///
    /// See [`HtmlTemplate::new`].
    pub fn created_invoices() -> Result<Self, TemplateError> {
        Self::new(CREATED_INVOICES)
    }

    /// Replaces every `[[key]]` with its value.
    ///
    /// Keys the template never mentions are logged and ignored.
    ///
    /// # Errors
    ///
    /// [`TemplateError::Unfilled`] if placeholders remain after substitution.
    pub fn render(&self, data: &[(&str, String)]) -> Result<String, TemplateError> {
        let unused = self.unused_keys(data);
        if !unused.is_empty() {
            log::warn!("Template data not used: {unused:?}");
        }

        let mut html = self.source.clone();
        for (key, value) in data {
            html = html.replace(&format!("[[{key}]]"), value);
        }

        let unfilled = self.unfilled_tokens(&html);
        if !unfilled.is_empty() {
            return Err(TemplateError::Unfilled(unfilled));
        }
        Ok(html)
    }

    /// Placeholder names still present in `html`.
    #[must_use]
    pub fn unfilled_tokens(&self, html: &str) -> Vec<String> {
        self.token
            .captures_iter(html)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    #[must_use]
    pub fn unused_keys(&self, data: &[(&str, String)]) -> Vec<String> {
        data.iter()
            .filter(|(key, _)| !self.source.contains(&format!("[[{key}]]")))
            .map(|(key, _)| (*key).to_string())
            .collect()
    }
}

/// A bordered `<table class="dataframe">` with escaped cells.
#[derive(Debug, Clone, Default)]
pub struct HtmlTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl HtmlTable {
    #[must_use]
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("<table border=\"1\" class=\"dataframe\">\n  <thead>\n    <tr style=\"text-align: right;\">\n");
        for column in &self.columns {
            let _ = writeln!(out, "      <th>{}</th>", escape(column));
        }
        out.push_str("    </tr>\n  </thead>\n  <tbody>\n");
        for row in &self.rows {
            out.push_str("    <tr>\n");
            for cell in row {
                let _ = writeln!(out, "      <td>{}</td>", escape(cell));
            }
            out.push_str("    </tr>\n");
        }
        out.push_str("  </tbody>\n</table>");
        out
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// `1234567.891` becomes `1,234,567.89`.
#[must_use]
pub fn format_amount(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::new();
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{cents}")
}
