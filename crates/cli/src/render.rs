// Human-readable output for the CLI commands
use colored::Colorize;
use std::collections::BTreeMap;
use tabled::{Table, Tabled};

use isoenv_core::domain::{EnvironmentSpec, EnvironmentStatus, ExecutionResult};

#[derive(Tabled)]
struct StatusRow {
    source: String,
    provisioned: &'static str,
    interpreter: &'static str,
    root: &'static str,
    detail: String,
}

#[derive(Tabled)]
struct SourceRow {
    source: String,
    env_root: String,
    dependencies: usize,
    secrets: String,
    timeout_s: u64,
    retries: u32,
    wrapper: String,
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

pub fn status_table(status: &BTreeMap<String, EnvironmentStatus>) {
    let ready = status.values().filter(|s| s.provisioned).count();

    println!("{}", "Environment Status".cyan().bold());
    println!();

    let rows: Vec<StatusRow> = status
        .values()
        .map(|s| StatusRow {
            source: s.source_id.clone(),
            provisioned: yes_no(s.provisioned),
            interpreter: yes_no(s.interpreter_exists),
            root: yes_no(s.root_exists),
            detail: s.detail.clone(),
        })
        .collect();
    println!("{}", Table::new(rows));
    println!();

    let summary = format!("{}/{} environments provisioned", ready, status.len());
    if ready == status.len() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.yellow());
    }
}

pub fn sources_table<'a>(specs: impl Iterator<Item = &'a EnvironmentSpec>) {
    let rows: Vec<SourceRow> = specs
        .map(|spec| SourceRow {
            source: spec.source_id.clone(),
            env_root: spec.env_root.display().to_string(),
            dependencies: spec.dependencies.len(),
            secrets: spec
                .required_secrets
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            timeout_s: spec.timeout_seconds,
            retries: spec.max_retries,
            wrapper: spec.wrapper.to_string(),
        })
        .collect();

    println!("{}", "Registered Sources".cyan().bold());
    println!();
    println!("{}", Table::new(rows));
}

/// Summary on stderr, the child's own output passed through
pub fn execution_result(result: &ExecutionResult) {
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }

    eprintln!();
    if result.success {
        eprintln!(
            "{}",
            format!("✓ {} finished", result.source_id).green().bold()
        );
    } else {
        eprintln!("{}", format!("✗ {} failed", result.source_id).red().bold());
    }
    eprintln!("  {} {}", "Script:".bold(), result.script_path.display());
    eprintln!("  {} {}", "Return code:".bold(), result.return_code);
    eprintln!("  {} {}", "Attempts:".bold(), result.attempt_count);
    eprintln!("  {} {} ms", "Duration:".bold(), result.duration_ms());
    if result.stdout_truncated || result.stderr_truncated {
        eprintln!("  {} output truncated", "!".yellow().bold());
    }
    if let Some(error) = &result.error {
        eprintln!("  {} {}", "Error:".bold(), error.to_string().red());
    }
}
