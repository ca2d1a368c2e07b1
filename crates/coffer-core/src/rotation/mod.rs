//! Master key rotation over the credential store.
//!
//! A run resolves its target version, counts candidates, optionally stops
//! there (dry run, declined confirmation), and otherwise re-wraps candidates
//! batch by batch. Each batch is one transaction; a record that cannot be
//! re-wrapped is logged, counted and skipped while the rest of its batch still
//! commits.

use serde::Serialize;
use uuid::Uuid;

use crate::envelope::EnvelopeService;
use crate::error::{CofferError, Result};
use crate::store::CredentialDb;
use crate::types::{RecordFailure, RotationSelection, RotationStatus};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct RotationRequest {
    /// Only rotate records wrapped under this version.
    pub from_version: Option<u32>,
    /// Target version; defaults to the registry's current version.
    pub to_version: Option<u32>,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl Default for RotationRequest {
    fn default() -> Self {
        Self {
            from_version: None,
            to_version: None,
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
        }
    }
}

/// Terminal state of a rotation run.
#[derive(Debug)]
pub enum RotationOutcome {
    /// No record matched the selection.
    NothingToDo { selection: RotationSelection },
    /// Dry run: candidates counted, nothing written.
    DryRun {
        selection: RotationSelection,
        candidates: u64,
    },
    /// The operator declined the confirmation; nothing written.
    Cancelled {
        selection: RotationSelection,
        candidates: u64,
    },
    Completed(RotationReport),
}

#[derive(Debug, Serialize)]
pub struct RotationReport {
    pub run_id: String,
    pub selection: RotationSelection,
    pub candidates: u64,
    pub processed: u64,
    pub batches: u64,
    #[serde(skip)]
    pub failures: Vec<RecordFailure>,
}

impl RotationReport {
    pub fn errors(&self) -> u64 {
        self.failures.len() as u64
    }

    /// True when every attempted record was rotated.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Hooks for reporting progress while a run is in flight.
pub trait RotationProgress {
    fn on_start(&mut self, _candidates: u64) {}
    fn on_record_failed(&mut self, _failure: &RecordFailure) {}
    fn on_batch(&mut self, _rotated: u64, _failed: u64) {}
    fn on_finish(&mut self, _report: &RotationReport) {}
    /// The run stopped on a fatal error; batches committed so far stay committed.
    fn on_abort(&mut self, _report: &RotationReport, _error: &CofferError) {}
}

/// Progress sink that ignores every event.
pub struct NoProgress;

impl RotationProgress for NoProgress {}

pub struct Rotator<'a> {
    envelope: &'a EnvelopeService,
}

impl<'a> Rotator<'a> {
    pub fn new(envelope: &'a EnvelopeService) -> Self {
        Self { envelope }
    }

    /// Work out which records a request would touch.
    ///
    /// Fails with `Configuration` when the target version is missing or
    /// unregistered; nothing has been read or written at that point.
    pub fn plan(&self, request: &RotationRequest) -> Result<RotationSelection> {
        let registry = self.envelope.registry();
        let to_version = match request.to_version {
            Some(v) => v,
            None => registry.current_version()?,
        };

        if !registry.contains(to_version) {
            return Err(CofferError::Configuration(format!(
                "target master key version {to_version} is not registered"
            )));
        }
        if request.from_version == Some(to_version) {
            return Err(CofferError::Configuration(format!(
                "source and target versions are both {to_version}"
            )));
        }
        if request.batch_size == 0 {
            return Err(CofferError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }

        Ok(RotationSelection {
            from_version: request.from_version,
            to_version,
        })
    }

    /// Run a rotation.
    ///
    /// `confirm` is called with the candidate count before anything is
    /// written; returning `false` cancels the run.
    pub fn run<C, P>(
        &self,
        db: &mut CredentialDb,
        request: &RotationRequest,
        confirm: C,
        progress: &mut P,
    ) -> Result<RotationOutcome>
    where
        C: FnOnce(&RotationSelection, u64) -> bool,
        P: RotationProgress + ?Sized,
    {
        let selection = self.plan(request)?;
        let candidates = db.count_rotation_candidates(&selection)?;

        if candidates == 0 {
            tracing::info!(to_version = selection.to_version, "No credentials to rotate");
            return Ok(RotationOutcome::NothingToDo { selection });
        }
        if request.dry_run {
            return Ok(RotationOutcome::DryRun {
                selection,
                candidates,
            });
        }
        if !confirm(&selection, candidates) {
            return Ok(RotationOutcome::Cancelled {
                selection,
                candidates,
            });
        }

        let run_id = Uuid::now_v7().to_string();
        db.start_rotation_run(&run_id, &selection, candidates)?;
        tracing::info!(
            run_id = %run_id,
            from_version = ?selection.from_version,
            to_version = selection.to_version,
            candidates,
            "Starting key rotation"
        );
        progress.on_start(candidates);

        let mut report = RotationReport {
            run_id,
            selection,
            candidates,
            processed: 0,
            batches: 0,
            failures: Vec::new(),
        };

        if let Err(e) = self.process_batches(db, request.batch_size, &mut report, progress) {
            tracing::error!(run_id = %report.run_id, error = %e, "Key rotation aborted");
            if let Err(audit) = db.finish_rotation_run(
                &report.run_id,
                RotationStatus::Failed,
                report.processed,
                report.errors(),
            ) {
                tracing::warn!(run_id = %report.run_id, error = %audit, "Could not record failed rotation run");
            }
            progress.on_abort(&report, &e);
            return Err(e);
        }

        let status = if report.is_clean() {
            RotationStatus::Completed
        } else {
            RotationStatus::CompletedWithErrors
        };
        db.finish_rotation_run(&report.run_id, status, report.processed, report.errors())?;
        tracing::info!(
            run_id = %report.run_id,
            processed = report.processed,
            errors = report.errors(),
            "Key rotation finished"
        );
        progress.on_finish(&report);

        Ok(RotationOutcome::Completed(report))
    }

    fn process_batches<P>(
        &self,
        db: &mut CredentialDb,
        batch_size: usize,
        report: &mut RotationReport,
        progress: &mut P,
    ) -> Result<()>
    where
        P: RotationProgress + ?Sized,
    {
        let selection = report.selection;
        let mut after_id = 0i64;

        loop {
            let batch = db.rotate_batch(&selection, after_id, batch_size, |record| {
                self.envelope.re_encrypt(
                    &record.secret.ciphertext,
                    &record.secret.wrapped_key,
                    record.secret.key_version,
                    selection.to_version,
                )
            })?;

            let Some(last_id) = batch.last_id else {
                break;
            };
            after_id = last_id;
            report.batches += 1;
            report.processed += batch.rotated;

            for failure in &batch.failures {
                tracing::warn!(
                    record_id = failure.record_id,
                    owner = %failure.owner,
                    name = %failure.name,
                    key_version = failure.key_version,
                    error = %failure.error,
                    "Failed to rotate credential"
                );
                progress.on_record_failed(failure);
            }
            progress.on_batch(batch.rotated, batch.failures.len() as u64);
            report.failures.extend(batch.failures);

            tracing::debug!(
                batch = report.batches,
                rotated = batch.rotated,
                after_id,
                "Committed rotation batch"
            );

            if batch.selected < batch_size {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_key;
    use crate::registry::MasterKeyRegistry;
    use crate::types::{EncryptedSecret, MasterKey};
    use std::sync::Arc;

    fn envelope(versions: &[u32], current: u32) -> EnvelopeService {
        let keys = versions.iter().map(|&version| MasterKey {
            version,
            key: random_key(),
        });
        EnvelopeService::new(Arc::new(
            MasterKeyRegistry::new(keys, Some(current)).unwrap(),
        ))
    }

    /// Encrypt under a specific (non-current) version, as if written before a rotation.
    fn legacy_secret(svc: &EnvelopeService, plaintext: &str, version: u32) -> EncryptedSecret {
        let current = svc.encrypt(plaintext).unwrap();
        if current.key_version == version {
            return current;
        }
        svc.re_encrypt(
            &current.ciphertext,
            &current.wrapped_key,
            current.key_version,
            version,
        )
        .unwrap()
    }

    fn yes(_: &RotationSelection, _: u64) -> bool {
        true
    }

    #[derive(Default)]
    struct Recorder {
        started: Option<u64>,
        batches: Vec<(u64, u64)>,
        failed_ids: Vec<i64>,
        finished: bool,
        aborted: bool,
    }

    impl RotationProgress for Recorder {
        fn on_start(&mut self, candidates: u64) {
            self.started = Some(candidates);
        }
        fn on_record_failed(&mut self, failure: &RecordFailure) {
            self.failed_ids.push(failure.record_id);
        }
        fn on_batch(&mut self, rotated: u64, failed: u64) {
            self.batches.push((rotated, failed));
        }
        fn on_finish(&mut self, _report: &RotationReport) {
            self.finished = true;
        }
        fn on_abort(&mut self, _report: &RotationReport, _error: &CofferError) {
            self.aborted = true;
        }
    }

    #[test]
    fn plan_defaults_to_current_version() {
        let svc = envelope(&[1, 2], 2);
        let selection = Rotator::new(&svc).plan(&RotationRequest::default()).unwrap();
        assert_eq!(selection.to_version, 2);
        assert_eq!(selection.from_version, None);
    }

    #[test]
    fn plan_rejects_bad_requests() {
        let svc = envelope(&[1, 2], 2);
        let rotator = Rotator::new(&svc);

        let unknown_target = RotationRequest {
            to_version: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            rotator.plan(&unknown_target),
            Err(CofferError::Configuration(_))
        ));

        let same = RotationRequest {
            from_version: Some(2),
            to_version: Some(2),
            ..Default::default()
        };
        assert!(rotator.plan(&same).is_err());

        let zero_batch = RotationRequest {
            batch_size: 0,
            ..Default::default()
        };
        assert!(rotator.plan(&zero_batch).is_err());
    }

    #[test]
    fn rotates_stale_records_across_batches() {
        let svc = envelope(&[1, 2, 3], 3);
        let mut db = CredentialDb::open_in_memory().unwrap();
        let mut originals = Vec::new();
        for i in 0..7 {
            let version = if i % 2 == 0 { 1 } else { 2 };
            let secret = legacy_secret(&svc, &format!("secret-{i}"), version);
            let id = db.insert_credential("alice", &format!("c{i}"), &secret).unwrap();
            originals.push((id, secret));
        }
        let current = svc.encrypt("already-current").unwrap();
        let current_id = db.insert_credential("alice", "current", &current).unwrap();

        let request = RotationRequest {
            batch_size: 3,
            ..Default::default()
        };
        let mut recorder = Recorder::default();
        let outcome = Rotator::new(&svc)
            .run(&mut db, &request, yes, &mut recorder)
            .unwrap();

        let RotationOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.candidates, 7);
        assert_eq!(report.processed, 7);
        assert_eq!(report.batches, 3);
        assert!(report.is_clean());
        assert_eq!(recorder.started, Some(7));
        assert_eq!(recorder.batches, vec![(3, 0), (3, 0), (1, 0)]);
        assert!(recorder.finished);

        for (i, (id, original)) in originals.iter().enumerate() {
            let stored = db.get_credential(*id).unwrap();
            assert_eq!(stored.secret.key_version, 3);
            assert_eq!(stored.secret.ciphertext, original.ciphertext);
            assert_eq!(svc.decrypt_secret(&stored.secret).unwrap(), format!("secret-{i}"));
        }
        assert_eq!(db.get_credential(current_id).unwrap().secret, current);

        let runs = db.list_rotation_runs(1).unwrap();
        assert_eq!(runs[0].status, RotationStatus::Completed);
        assert_eq!(runs[0].processed, 7);
    }

    #[test]
    fn pinned_source_version_leaves_others_alone() {
        let svc = envelope(&[1, 2, 3], 3);
        let mut db = CredentialDb::open_in_memory().unwrap();
        let v1 = db
            .insert_credential("a", "v1", &legacy_secret(&svc, "one", 1))
            .unwrap();
        let v2 = db
            .insert_credential("a", "v2", &legacy_secret(&svc, "two", 2))
            .unwrap();

        let request = RotationRequest {
            from_version: Some(1),
            to_version: Some(3),
            ..Default::default()
        };
        Rotator::new(&svc)
            .run(&mut db, &request, yes, &mut NoProgress)
            .unwrap();

        assert_eq!(db.get_credential(v1).unwrap().secret.key_version, 3);
        assert_eq!(db.get_credential(v2).unwrap().secret.key_version, 2);
    }

    #[test]
    fn one_corrupted_record_does_not_block_the_batch() {
        let svc = envelope(&[1, 2], 2);
        let mut db = CredentialDb::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut secret = legacy_secret(&svc, &format!("s{i}"), 1);
            if i == 2 {
                let last = secret.ciphertext.len() - 1;
                secret.ciphertext[last] ^= 0x01;
            }
            ids.push(db.insert_credential("a", &format!("n{i}"), &secret).unwrap());
        }

        let mut recorder = Recorder::default();
        let outcome = Rotator::new(&svc)
            .run(&mut db, &RotationRequest::default(), yes, &mut recorder)
            .unwrap();

        let RotationOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.processed, 4);
        assert_eq!(report.errors(), 1);
        assert!(!report.is_clean());
        assert_eq!(report.failures[0].record_id, ids[2]);
        assert!(matches!(
            report.failures[0].error,
            CofferError::DecryptionFailed(_)
        ));
        assert_eq!(recorder.failed_ids, vec![ids[2]]);

        for (i, id) in ids.iter().enumerate() {
            let expected = if i == 2 { 1 } else { 2 };
            assert_eq!(db.get_credential(*id).unwrap().secret.key_version, expected);
        }
        assert_eq!(
            db.list_rotation_runs(1).unwrap()[0].status,
            RotationStatus::CompletedWithErrors
        );
    }

    #[test]
    fn unknown_source_version_is_a_record_error() {
        let svc = envelope(&[2, 3], 3);
        let mut db = CredentialDb::open_in_memory().unwrap();
        let orphan = EncryptedSecret {
            ciphertext: vec![0; 40],
            wrapped_key: vec![0; 60],
            key_version: 1,
        };
        db.insert_credential("a", "orphan", &orphan).unwrap();
        db.insert_credential("a", "fine", &legacy_secret(&svc, "ok", 2))
            .unwrap();

        let outcome = Rotator::new(&svc)
            .run(&mut db, &RotationRequest::default(), yes, &mut NoProgress)
            .unwrap();
        let RotationOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.processed, 1);
        assert!(matches!(
            report.failures[0].error,
            CofferError::UnknownKeyVersion(1)
        ));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let svc = envelope(&[1, 2], 2);
        let mut db = CredentialDb::open_in_memory().unwrap();
        let secret = legacy_secret(&svc, "s", 1);
        let id = db.insert_credential("a", "n", &secret).unwrap();

        let request = RotationRequest {
            dry_run: true,
            ..Default::default()
        };
        let outcome = Rotator::new(&svc)
            .run(&mut db, &request, |_, _| panic!("dry run must not ask"), &mut NoProgress)
            .unwrap();

        assert!(matches!(outcome, RotationOutcome::DryRun { candidates: 1, .. }));
        assert_eq!(db.get_credential(id).unwrap().secret, secret);
        assert!(db.list_rotation_runs(10).unwrap().is_empty());
    }

    #[test]
    fn declined_confirmation_cancels() {
        let svc = envelope(&[1, 2], 2);
        let mut db = CredentialDb::open_in_memory().unwrap();
        let secret = legacy_secret(&svc, "s", 1);
        let id = db.insert_credential("a", "n", &secret).unwrap();

        let outcome = Rotator::new(&svc)
            .run(&mut db, &RotationRequest::default(), |_, n| {
                assert_eq!(n, 1);
                false
            }, &mut NoProgress)
            .unwrap();

        assert!(matches!(outcome, RotationOutcome::Cancelled { candidates: 1, .. }));
        assert_eq!(db.get_credential(id).unwrap().secret, secret);
    }

    #[test]
    fn nothing_to_do_when_all_current() {
        let svc = envelope(&[1, 2], 2);
        let mut db = CredentialDb::open_in_memory().unwrap();
        db.insert_credential("a", "n", &svc.encrypt("s").unwrap())
            .unwrap();

        let outcome = Rotator::new(&svc)
            .run(&mut db, &RotationRequest::default(), yes, &mut NoProgress)
            .unwrap();
        assert!(matches!(outcome, RotationOutcome::NothingToDo { .. }));
    }

    #[test]
    fn fatal_error_keeps_original_cause_and_notifies_progress() {
        let svc = envelope(&[1, 2], 2);
        let mut db = CredentialDb::open_in_memory().unwrap();
        db.insert_credential("a", "n", &legacy_secret(&svc, "s", 1))
            .unwrap();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER lock_credentials BEFORE UPDATE ON credentials
                 BEGIN SELECT RAISE(ABORT, 'credentials locked'); END;
                 CREATE TRIGGER lock_runs BEFORE UPDATE ON rotation_runs
                 BEGIN SELECT RAISE(ABORT, 'audit locked'); END;",
            )
            .unwrap();

        let mut recorder = Recorder::default();
        let err = Rotator::new(&svc)
            .run(&mut db, &RotationRequest::default(), yes, &mut recorder)
            .unwrap_err();

        assert!(matches!(err, CofferError::Database(_)));
        assert!(err.to_string().contains("credentials locked"));
        assert!(recorder.aborted);
        assert!(!recorder.finished);
    }

    #[test]
    fn fatal_error_marks_run_failed() {
        let svc = envelope(&[1, 2], 2);
        let mut db = CredentialDb::open_in_memory().unwrap();
        let id = db
            .insert_credential("a", "n", &legacy_secret(&svc, "s", 1))
            .unwrap();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER lock_credentials BEFORE UPDATE ON credentials
                 BEGIN SELECT RAISE(ABORT, 'credentials locked'); END;",
            )
            .unwrap();

        let result = Rotator::new(&svc).run(&mut db, &RotationRequest::default(), yes, &mut NoProgress);

        assert!(result.is_err());
        assert_eq!(db.get_credential(id).unwrap().secret.key_version, 1);
        assert_eq!(db.list_rotation_runs(1).unwrap()[0].status, RotationStatus::Failed);
    }

    #[test]
    fn missing_target_aborts_before_any_write() {
        let svc = envelope(&[1, 2], 2);
        let mut db = CredentialDb::open_in_memory().unwrap();
        let secret = legacy_secret(&svc, "s", 1);
        let id = db.insert_credential("a", "n", &secret).unwrap();

        let request = RotationRequest {
            to_version: Some(9),
            ..Default::default()
        };
        let result = Rotator::new(&svc).run(&mut db, &request, yes, &mut NoProgress);

        assert!(matches!(result, Err(CofferError::Configuration(_))));
        assert_eq!(db.get_credential(id).unwrap().secret, secret);
        assert!(db.list_rotation_runs(10).unwrap().is_empty());
    }
}
