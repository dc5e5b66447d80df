use std::io::{self, Write};

use serde::Serialize;

use crate::engine::{ProgressEvent, ProgressSink};
use crate::ica::{IcaProject, IcaProjectData};
use crate::report::SyncReport;
use crate::tool::ToolInfo;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &SyncReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_projects(projects: &[IcaProject]) -> io::Result<()> {
        Self::print_json(&projects)
    }

    pub fn print_project_data(data: &[IcaProjectData]) -> io::Result<()> {
        Self::print_json(&data)
    }

    pub fn print_tools(tools: &[ToolInfo]) -> io::Result<()> {
        Self::print_json(&tools)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Line-per-event progress on stderr: `phase=Plan; 3 to transfer` prints as
/// `[Plan] 3 to transfer`.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let line = match event
            .message
            .strip_prefix("phase=")
            .and_then(|rest| rest.split_once("; "))
        {
            Some((phase, detail)) => format!("{CYAN}[{phase}]{RESET} {detail}"),
            None => event.message,
        };
        match event.elapsed {
            Some(elapsed) => eprintln!("{line} ({:.1}s)", elapsed.as_secs_f64()),
            None => eprintln!("{line}"),
        }
    }
}

pub fn print_summary(report: &SyncReport) {
    let summary = &report.summary;
    let title = if report.dry_run {
        format!("{} plan (dry run)", report.direction)
    } else {
        format!("{} summary", report.direction)
    };
    println!("{CYAN}📦 ngs-sync {title}{RESET}");
    println!(
        "{GREEN}✅ success: {}  ♻️ skipped: {}{RESET}",
        summary.succeeded, summary.skipped
    );
    let failed_color = if summary.failed > 0 { RED } else { YELLOW };
    println!("{failed_color}⚠️ failed: {}{RESET}", summary.failed);

    for row in &report.rows {
        let color = match row.status.as_str() {
            "succeeded" => GREEN,
            "failed" => RED,
            _ => YELLOW,
        };
        match &row.reason {
            Some(reason) => println!(
                "{color}• {} ({}) {}: {reason}{RESET}",
                row.name, row.size, row.status
            ),
            None => println!("{color}• {} ({}) {}{RESET}", row.name, row.size, row.status),
        }
        if let Some(access) = &row.access {
            println!("{color}   🔗 {}{RESET}", access.url);
            println!("{color}   ⏳ expires {}{RESET}", access.expires_at.to_rfc3339());
        }
    }
}

pub fn print_projects(projects: &[IcaProject]) {
    if projects.is_empty() {
        println!("no projects");
        return;
    }
    for project in projects {
        let state = if project.active { GREEN } else { YELLOW };
        println!(
            "{state}{}{RESET}  {}  region={} owner={} billing={} created={}",
            project.id,
            project.name,
            project.region,
            project.owner,
            project.billing_mode,
            project.time_created
        );
    }
}

pub fn print_project_data(data: &[IcaProjectData]) {
    if data.is_empty() {
        println!("no data");
        return;
    }
    for item in data {
        println!(
            "{:<7} {:>10}  {}  {}",
            item.data_type.to_string(),
            item.file_size_readable(),
            item.id,
            item.path
        );
    }
}

pub fn print_tools(tools: &[ToolInfo]) {
    for tool in tools {
        match (&tool.path, &tool.version) {
            (Some(path), version) => println!(
                "{GREEN}✅ {}{RESET} {path} {}",
                tool.name,
                version.as_deref().unwrap_or("(version unknown)")
            ),
            (None, _) => println!("{RED}❌ {}{RESET} not found on PATH", tool.name),
        }
    }
}
