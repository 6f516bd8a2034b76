// Menu-driven front end over the flat spreadsheet source.
//
// Flow:
// - [1] asks for a year range, levels and whether to match parent codes,
//   then writes the wide/long files of every level to the download dir.
// - After a run the user can go back to the menu or exit.
// - Closed stdin ends the session from any prompt.
use chrono::Local;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, Write};
use std::time::Instant;

use crate::config::AppConfig;
use crate::error::Result;
use crate::loader::SpreadsheetSource;
use crate::output::{self, panel_artifacts, preview_rows, preview_table, write_artifacts};
use crate::panel::{assemble, Panel};
use crate::types::{ArtifactRow, PanelRequest, Tier};
use crate::util::{format_int, format_size};

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    request: &'a PanelRequest,
    counts: BTreeMap<Tier, BTreeMap<i32, usize>>,
    files: Vec<String>,
}

/// Print `label` and read one trimmed line; `None` once input is closed.
fn prompt(input: &mut dyn BufRead, label: &str) -> Option<String> {
    print!("{}", label);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    match input.read_line(&mut buf) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(buf.trim().to_string()),
    }
}

pub fn parse_yes_no(input: &str) -> Option<bool> {
    match input.trim().to_uppercase().as_str() {
        "Y" | "YES" | "是" => Some(true),
        "N" | "NO" | "否" => Some(false),
        _ => None,
    }
}

/// `1,3` / `省级 县级` / blank for all three levels.
pub fn parse_tier_selection(input: &str) -> Option<BTreeSet<Tier>> {
    let parts: Vec<&str> = input
        .split(|c: char| c == ',' || c == '，' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return Some(Tier::ALL.into_iter().collect());
    }
    parts
        .into_iter()
        .map(|p| match p {
            "1" => Some(Tier::Province),
            "2" => Some(Tier::City),
            "3" => Some(Tier::County),
            other => other.parse::<Tier>().ok(),
        })
        .collect()
}

fn prompt_yes_no(input: &mut dyn BufRead, label: &str) -> Option<bool> {
    loop {
        match parse_yes_no(&prompt(input, label)?) {
            Some(v) => return Some(v),
            None => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

fn prompt_year(input: &mut dyn BufRead, label: &str, min: i32, max: i32) -> Option<i32> {
    loop {
        match prompt(input, &format!("{} ({}-{}): ", label, min, max))?.parse::<i32>() {
            Ok(y) if (min..=max).contains(&y) => return Some(y),
            _ => println!("Please enter a year between {} and {}.", min, max),
        }
    }
}

fn prompt_tiers(input: &mut dyn BufRead) -> Option<BTreeSet<Tier>> {
    loop {
        let line = prompt(
            input,
            "Levels to export [1] 省级 [2] 地级 [3] 县级 (comma separated, blank = all): ",
        )?;
        match parse_tier_selection(&line) {
            Some(tiers) => return Some(tiers),
            None => println!("Invalid selection. Use 1, 2 and/or 3."),
        }
    }
}

/// `Ok(None)` when input closed before the request was complete.
fn prompt_request(input: &mut dyn BufRead, config: &AppConfig) -> Result<Option<PanelRequest>> {
    let Some(start) = prompt_year(input, "Start year", config.first_year, config.last_year) else {
        return Ok(None);
    };
    let Some(end) = prompt_year(input, "End year", start, config.last_year) else {
        return Ok(None);
    };
    let Some(tiers) = prompt_tiers(input) else {
        return Ok(None);
    };
    let include_parent = if tiers.iter().all(|t| *t == Tier::Province) {
        println!("Parent matching is not available for the province level alone.");
        false
    } else {
        match prompt_yes_no(input, "Match parent division codes (Y/N): ") {
            Some(v) => v,
            None => return Ok(None),
        }
    };
    PanelRequest::new(start, end, tiers, include_parent).map(Some)
}

fn show_panel(panel: &Panel) {
    for tp in panel.request.tiers.iter().filter_map(|t| panel.tier(*t)) {
        println!("{} long panel ({} rows)\n", tp.tier.label(), format_int(tp.long.len()));
        preview_table(&tp.long_table(panel.request.include_parent), 3);
    }
    println!("行政区划数量验证\n");
    preview_table(&panel.validation_table(), usize::MAX);
}

/// One generation round. `Ok(false)` means input closed mid-prompt.
fn run_once(input: &mut dyn BufRead, config: &AppConfig) -> Result<bool> {
    let Some(request) = prompt_request(input, config)? else {
        return Ok(false);
    };
    let started = Instant::now();
    let now = Local::now();

    println!("\nReading {} ...", config.spreadsheet_path.display());
    let source = SpreadsheetSource::new(&config.spreadsheet_path);
    let (records, report) = source.fetch_flat(request.span)?;
    println!(
        "Processing dataset... ({} rows loaded, {} skipped)\n",
        format_int(report.loaded_rows),
        format_int(report.skipped_rows)
    );

    let panel = assemble(&request, &records)?;
    show_panel(&panel);

    let mut artifacts = panel_artifacts(&panel, now)?;
    let summary = RunSummary {
        request: &request,
        counts: panel.tiers.iter().map(|t| (t.tier, t.counts.clone())).collect(),
        files: artifacts.iter().map(|a| a.file_name.clone()).collect(),
    };
    let summary_name = format!("xzqh_summary_{}.json", output::stamp(now));
    artifacts.push(output::json_artifact(&summary_name, &summary)?);
    let paths = write_artifacts(&config.download_dir, &artifacts)?;

    let listing: Vec<ArtifactRow> = artifacts
        .iter()
        .map(|a| ArtifactRow {
            file: a.file_name.clone(),
            rows: format_int(a.rows),
            size: format_size(a.bytes.len() as u64),
        })
        .collect();
    println!("Outputs saved to {}\n", config.download_dir.display());
    preview_rows(&listing);
    println!(
        "Done: {} files written in {:.2}s.\n",
        paths.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(true)
}

pub fn run(config: &AppConfig) {
    let stdin = io::stdin();
    run_with(&mut stdin.lock(), config);
}

/// Menu loop over any line source. Returns when the user exits or input ends.
fn run_with(input: &mut dyn BufRead, config: &AppConfig) {
    loop {
        println!("Administrative Division Panel Generator");
        println!("[1] Generate panel");
        println!("[2] Exit\n");
        let Some(choice) = prompt(input, "Enter choice: ") else {
            println!("\nInput closed. Exiting the program.");
            break;
        };
        match choice.as_str() {
            "1" => {
                println!();
                match run_once(input, config) {
                    Ok(true) => {}
                    Ok(false) => {
                        println!("\nInput closed. Exiting the program.");
                        break;
                    }
                    Err(e) => {
                        log::error!("Panel generation failed: {}", e);
                        eprintln!("Error: {}\n", e);
                        if e.is_retryable() {
                            println!("Check {} and try again.\n", config.spreadsheet_path.display());
                        }
                    }
                }
                if prompt_yes_no(input, "Back to menu (Y/N): ") != Some(true) {
                    println!("Exiting the program.");
                    break;
                }
            }
            "2" => {
                println!("Exiting the program.");
                break;
            }
            _ => println!("Invalid choice. Please enter 1 or 2.\n"),
        }
    }
}
