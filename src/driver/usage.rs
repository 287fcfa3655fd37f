//! BuildKit cache record types and the disk usage report

use crate::error::{BkStateError, BkStateResult};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Category of a unit of BuildKit-managed cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Internal,
    Frontend,
    LocalSource,
    GitCheckout,
    CacheMount,
    Regular,
}

impl RecordType {
    /// Every record type the daemon knows about
    pub const ALL: [RecordType; 6] = [
        RecordType::Internal,
        RecordType::Frontend,
        RecordType::LocalSource,
        RecordType::GitCheckout,
        RecordType::CacheMount,
        RecordType::Regular,
    ];

    /// Name used by BuildKit filters and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Frontend => "frontend",
            Self::LocalSource => "source.local",
            Self::GitCheckout => "source.git.checkout",
            Self::CacheMount => "exec.cachemount",
            Self::Regular => "regular",
        }
    }

    /// Parse a list of names, rejecting anything unknown
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> BkStateResult<Vec<RecordType>> {
        names.iter().map(|name| name.as_ref().parse()).collect()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = BkStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == trimmed)
            .ok_or_else(|| BkStateError::UnknownRecordType(trimmed.to_string()))
    }
}

/// Prune filters evicting every record type outside `keep`.
///
/// One `type==<name>` expression per evicted type.
pub fn prune_filters(keep: &[RecordType]) -> Vec<String> {
    RecordType::ALL
        .into_iter()
        .filter(|t| !keep.contains(t))
        .map(|t| format!("type=={}", t))
        .collect()
}

/// One entry of the daemon's disk usage listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageRecord {
    pub id: String,
    pub parents: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub mutable: bool,
    pub in_use: bool,
    pub shared: bool,
    pub size: i64,
    pub description: String,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Reported as-is; newer daemons may send types this crate does not know
    pub record_type: String,
}

/// Sum of all positive record sizes
pub fn total_size(records: &[UsageRecord]) -> u64 {
    records
        .iter()
        .filter(|r| r.size > 0)
        .map(|r| r.size as u64)
        .sum()
}

/// Render the verbose listing followed by the summary.
///
/// Each block of `key: value` lines is aligned on its widest key.
pub fn render_disk_usage(records: &[UsageRecord]) -> String {
    let mut out = String::new();

    for record in records {
        let mut rows = vec![("ID", record.id.clone())];
        if !record.parents.is_empty() {
            rows.push(("Parents", record.parents.join(";")));
        }
        rows.push(("Created at", format_time(record.created_at)));
        rows.push(("Mutable", record.mutable.to_string()));
        rows.push(("Reclaimable", (!record.in_use).to_string()));
        rows.push(("Shared", record.shared.to_string()));
        rows.push(("Size", format_size(record.size)));
        if !record.description.is_empty() {
            rows.push(("Description", record.description.clone()));
        }
        rows.push(("Usage count", record.usage_count.to_string()));
        if record.last_used_at.is_some() {
            rows.push(("Last used", format_time(record.last_used_at)));
        }
        if !record.record_type.is_empty() {
            rows.push(("Type", record.record_type.clone()));
        }
        write_block(&mut out, &rows);
        out.push('\n');
    }

    let mut total = 0i64;
    let mut reclaimable = 0i64;
    let mut shared = 0i64;
    for record in records {
        if record.size > 0 {
            total += record.size;
            if !record.in_use {
                reclaimable += record.size;
            }
        }
        if record.shared {
            shared += record.size;
        }
    }

    let mut summary = Vec::new();
    if shared > 0 {
        summary.push(("Shared", format_size(shared)));
        summary.push(("Private", format_size(total - shared)));
    }
    summary.push(("Reclaimable", format_size(reclaimable)));
    summary.push(("Total", format_size(total)));
    write_block(&mut out, &summary);

    out
}

fn write_block(out: &mut String, rows: &[(&str, String)]) {
    let width = rows.iter().map(|(k, _)| k.len() + 1).max().unwrap_or(0);
    for (key, value) in rows {
        let label = format!("{}:", key);
        out.push_str(&format!("{:<width$} {}\n", label, value, width = width));
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S%.f UTC").to_string(),
        None => "-".to_string(),
    }
}

/// Format a byte count with two decimals in binary units
pub fn format_size(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;

    let value = bytes.max(0) as f64;
    if value >= TB {
        format!("{:.2} TB", value / TB)
    } else if value >= GB {
        format!("{:.2} GB", value / GB)
    } else if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.2} KB", value / KB)
    } else {
        format!("{} B", bytes.max(0))
    }
}
