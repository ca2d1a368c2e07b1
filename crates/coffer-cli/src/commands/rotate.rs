use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::Path;

use coffer_core::rotation::{
    RotationOutcome, RotationProgress, RotationReport, RotationRequest, Rotator,
};
use coffer_core::store::CredentialDb;
use coffer_core::types::{RecordFailure, RotationSelection};
use coffer_core::{CofferError, EnvelopeService};

use super::unlock::{load_config, load_envelope};

pub struct RotateArgs {
    pub from: Option<u32>,
    pub to: Option<u32>,
    pub batch_size: Option<usize>,
    pub dry_run: bool,
    pub yes: bool,
    pub json: bool,
}

struct BarProgress {
    pb: ProgressBar,
}

impl RotationProgress for BarProgress {
    fn on_start(&mut self, candidates: u64) {
        self.pb.set_length(candidates);
    }

    fn on_record_failed(&mut self, failure: &RecordFailure) {
        self.pb.println(format!(
            "ERROR: credential #{} ({}/{}, key v{}): {}",
            failure.record_id, failure.owner, failure.name, failure.key_version, failure.error
        ));
    }

    fn on_batch(&mut self, rotated: u64, failed: u64) {
        self.pb.inc(rotated + failed);
    }

    fn on_finish(&mut self, _report: &RotationReport) {
        self.pb.finish_and_clear();
    }

    fn on_abort(&mut self, _report: &RotationReport, _error: &CofferError) {
        self.pb.finish_and_clear();
    }
}

fn describe(selection: &RotationSelection) -> String {
    match selection.from_version {
        Some(from) => format!("from v{from} to v{}", selection.to_version),
        None => format!("wrapped under versions older than v{}", selection.to_version),
    }
}

fn confirm(selection: &RotationSelection, candidates: u64) -> bool {
    eprint!(
        "Rotate {candidates} credentials {}? [y/N] ",
        describe(selection)
    );
    if io::stderr().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub async fn run(args: RotateArgs, base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    let config = load_config(base_dir)?;
    let mut db = CredentialDb::open(Path::new(&config.coffer.db_path))?;
    let envelope = load_envelope(&config, cli_passphrase).await?;

    let request = RotationRequest {
        from_version: args.from,
        to_version: args.to,
        batch_size: args.batch_size.unwrap_or(config.rotation.batch_size),
        dry_run: args.dry_run,
    };

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    let mut progress = BarProgress { pb };

    let yes = args.yes;
    rotate_and_report(
        &mut db,
        &envelope,
        &request,
        args.json,
        |selection, candidates| yes || confirm(selection, candidates),
        &mut progress,
    )
}

/// Run a rotation, print its outcome, and fail when any record could not be
/// re-wrapped so the process exits non-zero.
fn rotate_and_report<C, P>(
    db: &mut CredentialDb,
    envelope: &EnvelopeService,
    request: &RotationRequest,
    json: bool,
    confirm: C,
    progress: &mut P,
) -> Result<()>
where
    C: FnOnce(&RotationSelection, u64) -> bool,
    P: RotationProgress,
{
    let outcome = Rotator::new(envelope).run(db, request, confirm, progress)?;

    let report = match outcome {
        RotationOutcome::NothingToDo { selection } => {
            println!("Nothing to rotate: no credentials {}.", describe(&selection));
            return Ok(());
        }
        RotationOutcome::DryRun {
            selection,
            candidates,
        } => {
            println!(
                "Dry run: would rotate {candidates} credentials {}.",
                describe(&selection)
            );
            return Ok(());
        }
        RotationOutcome::Cancelled { candidates, .. } => {
            println!("Cancelled: {candidates} credentials left unchanged.");
            return Ok(());
        }
        RotationOutcome::Completed(report) => report,
    };

    if json {
        let mut value = serde_json::to_value(&report)?;
        value["errors"] = report.errors().into();
        value["failed_records"] = report
            .failures
            .iter()
            .map(|f| f.record_id)
            .collect::<Vec<_>>()
            .into();
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "\nRotation {}: {} of {} credentials re-wrapped under v{} in {} batches, {} errors",
            report.run_id,
            report.processed,
            report.candidates,
            report.selection.to_version,
            report.batches,
            report.errors()
        );
    }

    if !report.is_clean() {
        anyhow::bail!(
            "{} credentials could not be rotated; inspect them and re-run `coffer rotate`",
            report.errors()
        );
    }
    Ok(())
}
