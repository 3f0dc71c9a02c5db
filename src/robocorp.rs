//! Runtime minutes from the Robocorp Control Room API.
//!
//! Unattended process runs are billed per step, each step rounded up to a
//! whole minute. Assistant runs are billed on their total duration, rounded up.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

use crate::{billing::BillingPeriod, error::RobocorpError};

pub const ROBOCORP_API: &str = "https://cloud.robocorp.com/api/v1/";
const PAGE_LIMIT: &str = "500";

#[derive(Debug, Clone, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRun {
    pub id: String,
    #[serde(default)]
    pub process: Option<NamedRef>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepRun {
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantRun {
    pub id: String,
    #[serde(default)]
    pub assistant: Option<NamedRef>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Unattended,
    Assistant,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunKind::Unattended => "Unattended",
            RunKind::Assistant => "Assistant",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunUsage {
    pub process: String,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub minutes: u64,
}

/// Billable runs of one workspace within a billing period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageReport {
    pub runs: Vec<RunUsage>,
    pub total_minutes: u64,
}

impl UsageReport {
    fn push(&mut self, run: RunUsage) {
        self.total_minutes += run.minutes;
        self.runs.push(run);
    }

    /// Detail report attached to the invoice, one row per run plus a total.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from("Process,Kind,Started,Minutes\n");
        for run in &self.runs {
            let _ = writeln!(
                out,
                "{},{},{},{}",
                csv_field(&run.process),
                run.kind,
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.minutes
            );
        }
        let _ = writeln!(out, "Total,,,{}", self.total_minutes);
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Seconds rounded up to whole minutes. Missing or negative durations bill nothing.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn billable_minutes(seconds: Option<f64>) -> u64 {
    match seconds {
        Some(s) if s.is_finite() && s > 0.0 => (s / 60.0).ceil() as u64,
        _ => 0,
    }
}

pub struct RobocorpClient {
    http: Client,
    api_key: String,
    base_url: Url,
}

impl RobocorpClient {
    /// # Errors
    ///
    /// Never in practice; the built-in API URL always parses.
    pub fn new(api_key: impl Into<String>, http: Client) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: Url::parse(ROBOCORP_API)?,
        })
    }

    #[must_use]
    pub fn with_base_url(self, base_url: Url) -> Self {
        Self { base_url, ..self }
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, RobocorpError> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut()
            .append_pair("limit", PAGE_LIMIT)
            .extend_pairs(query);

        let mut items = Vec::new();
        loop {
            let response = self
                .http
                .get(url.clone())
                .header(reqwest::header::AUTHORIZATION, format!("RC-WSKEY {}", self.api_key))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(RobocorpError::Status {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                });
            }
            let page: Page<T> = response.json().await?;
            items.extend(page.data);
            match page.next {
                Some(next) if page.has_more => url = Url::parse(&next)?,
                _ => break,
            }
        }
        Ok(items)
    }

    /// Billable runs of `workspace_id` started within `period`.
    ///
    /// # Errors
    ///
    /// [`RobocorpError::Status`] on any failed page request.
    pub async fn usage_for_period(
        &self,
        workspace_id: &str,
        period: &BillingPeriod,
    ) -> Result<UsageReport, RobocorpError> {
        let mut report = UsageReport::default();

        let process_runs: Vec<ProcessRun> = self
            .get_paginated(&format!("workspaces/{workspace_id}/process-runs"), &[])
            .await?;
        for run in process_runs {
            let Some(started_at) = run.started_at.filter(|t| period.contains(*t)) else {
                continue;
            };
            let steps: Vec<StepRun> = self
                .get_paginated(
                    &format!("workspaces/{workspace_id}/step-runs"),
                    &[("process_run_id", run.id.as_str())],
                )
                .await?;
            let minutes = steps.iter().map(|s| billable_minutes(s.duration)).sum();
            report.push(RunUsage {
                process: run.process.map(|p| p.name).unwrap_or_default(),
                kind: RunKind::Unattended,
                started_at,
                minutes,
            });
        }

        let assistant_runs: Vec<AssistantRun> = self
            .get_paginated(&format!("workspaces/{workspace_id}/assistant-runs"), &[])
            .await?;
        for run in assistant_runs {
            let Some(started_at) = run.started_at.filter(|t| period.contains(*t)) else {
                continue;
            };
            report.push(RunUsage {
                process: run.assistant.map(|a| a.name).unwrap_or_default(),
                kind: RunKind::Assistant,
                started_at,
                minutes: billable_minutes(run.duration),
            });
        }

        report.runs.sort_by_key(|r| r.started_at);
        log::info!(
            "Workspace {workspace_id}: {} runs, {} minutes in {}",
            report.runs.len(),
            report.total_minutes,
            period.label()
        );
        Ok(report)
    }
}
