//! Pure rendering of cost data into a deliverable report.
//!
//! Composition never touches the network and is never retried. Any error
//! here is a data or logic defect and therefore fatal.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use super::{CostData, ServiceCost};
use crate::core::ReportDate;
use crate::errors::ComposeError;

/// How many services the report lists.
pub const TOP_SERVICES: usize = 10;

/// Services cheaper than this are left out of the listing.
pub const MIN_LISTED_AMOUNT: f64 = 0.01;

const REPORT_TITLE: &str = "Daily Cost Report";

/// A rendered report ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedReport {
    /// Message subject.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body.
    pub html: String,
}

impl ComposedReport {
    /// Hex SHA-256 over subject, text and html.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.subject, &self.text, &self.html] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Renders the report for `report_date`.
pub fn compose(report_date: ReportDate, data: &CostData) -> Result<ComposedReport, ComposeError> {
    if data.period != report_date {
        return Err(ComposeError::PeriodMismatch {
            expected: report_date.to_string(),
            actual: data.period.to_string(),
        });
    }

    let Some(total) = data.total else {
        return Ok(no_data_report(report_date));
    };
    ensure_finite("total", total)?;
    for service in &data.services {
        ensure_finite(&service.name, service.amount)?;
    }

    let listed = top_services(&data.services);

    let mut text = format!("{REPORT_TITLE} - {report_date}\n\nTotal Cost: ${total:.2}\n\nTop Services:\n");
    for service in &listed {
        let _ = writeln!(text, "  {}: ${:.2}", service.name, service.amount);
    }

    let mut html = format!(
        "<html>\n<body style=\"font-family: Arial, sans-serif; margin: 20px;\">\n\
         <h2>{REPORT_TITLE} - {report_date}</h2>\n\
         <h3>Total Cost: ${total:.2}</h3>\n\
         <h3>Top Services:</h3>\n\
         <table style=\"border-collapse: collapse; width: 100%;\">\n\
         <tr><th>Service</th><th>Cost</th></tr>\n"
    );
    for service in &listed {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>${:.2}</td></tr>",
            escape_html(&service.name),
            service.amount
        );
    }
    html.push_str("</table>\n<p style=\"font-size: 12px; color: #666;\">Generated automatically by reportflow</p>\n</body>\n</html>\n");

    Ok(ComposedReport {
        subject: format!("{REPORT_TITLE} - ${total:.2}"),
        text,
        html,
    })
}

fn no_data_report(report_date: ReportDate) -> ComposedReport {
    let message = format!("No cost data available for {report_date}.");
    ComposedReport {
        subject: format!("{REPORT_TITLE} - No Data"),
        html: format!("<p>{message}</p>"),
        text: message,
    }
}

fn ensure_finite(item: &str, amount: f64) -> Result<(), ComposeError> {
    if amount.is_finite() {
        Ok(())
    } else {
        Err(ComposeError::NonFiniteAmount {
            item: item.to_string(),
            amount,
        })
    }
}

/// Most expensive first, at most [`TOP_SERVICES`], dropping sub-cent lines.
fn top_services(services: &[ServiceCost]) -> Vec<&ServiceCost> {
    let mut sorted: Vec<&ServiceCost> = services.iter().collect();
    sorted.sort_by(|a, b| b.amount.total_cmp(&a.amount));
    sorted
        .into_iter()
        .take(TOP_SERVICES)
        .filter(|s| s.amount >= MIN_LISTED_AMOUNT)
        .collect()
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
