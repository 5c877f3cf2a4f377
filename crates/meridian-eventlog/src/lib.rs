#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-eventlog** – The per-session append-only event log, its
//! integrity checks, and its sidecar manifest.
//!
//! A session lives at `<data_dir>/sessions/<sessionId>/`: `events.log`
//! (one canonical-JSON event per line) and `manifest.json` (the hash chain
//! plus snapshot pins). `load` recomputes the chain and rejects anything that
//! doesn't match; `append` extends it atomically under a caller-held lock.

/// The error union raised by `load`/`append`.
pub mod error;
/// The sidecar manifest format.
pub mod manifest;

pub use error::{CorruptionLocation, EventLogError};
pub use manifest::{Health, Manifest, SnapshotPin};

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;

use meridian_canon::canonicalize_serializable;
use meridian_crypto::sha256;
use meridian_types::{DomainEvent, EventData, LockWitness, NodeId, Sha256Digest, SnapshotRef};
use tracing::debug;

/// A batch of events (plus any snapshot pins they introduce) to append in
/// one atomic write.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    /// Events to append, in `eventIndex` order.
    pub events: Vec<DomainEvent>,
    /// Snapshot pins introduced by this batch.
    pub snapshot_pins: Vec<SnapshotPin>,
}

/// The result of a successful `append`: events actually written, after
/// dropping any whose `dedupeKey` already existed.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// Events that were newly committed (duplicates are silently dropped).
    pub appended: Vec<DomainEvent>,
}

/// A fully loaded, integrity-checked session log.
#[derive(Debug, Clone)]
pub struct LoadedLog {
    /// All events in the log, in `eventIndex` order.
    pub events: Vec<DomainEvent>,
    /// The manifest as currently persisted.
    pub manifest: Manifest,
}

impl LoadedLog {
    /// Whether the session has ever been created.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A handle onto one session's log directory. Cheap to construct; does no
/// I/O until `load`/`append` is called.
#[derive(Debug, Clone)]
pub struct EventLog {
    session_dir: PathBuf,
}

impl EventLog {
    /// Point at `<data_dir>/sessions/<sessionId>`.
    pub fn at(data_dir: impl Into<PathBuf>, session_id: &meridian_types::SessionId) -> Self {
        Self {
            session_dir: data_dir.into().join("sessions").join(session_id.as_str()),
        }
    }

    fn events_path(&self) -> PathBuf {
        self.session_dir.join("events.log")
    }

    fn manifest_path(&self) -> PathBuf {
        self.session_dir.join("manifest.json")
    }

    /// Read all events, recompute the hash chain, and validate the log's
    /// structural invariants (contiguous indices, a single leading
    /// `session_created`, unique dedupe keys, edges only between known
    /// nodes, advanced outcomes backed by a node/edge pair). An absent
    /// session (no manifest, no log) loads as an empty, healthy log.
    pub fn load(&self) -> Result<LoadedLog, EventLogError> {
        let manifest = self.read_manifest()?;

        if manifest.health == Health::Corrupt {
            return Err(EventLogError::Corruption {
                location: CorruptionLocation::Tail,
                reason: "session was previously marked corrupt".to_string(),
            });
        }

        let events = self.read_events()?;

        if !events.is_empty() {
            let (head, tail) = recompute_chain(&events)?;
            if manifest.head_hash.as_ref() != Some(&head) {
                return Err(EventLogError::Corruption {
                    location: CorruptionLocation::Head,
                    reason: "recomputed head hash does not match the manifest".to_string(),
                });
            }
            if manifest.tail_hash.as_ref() != Some(&tail) {
                return Err(EventLogError::Corruption {
                    location: CorruptionLocation::Tail,
                    reason: "recomputed tail hash does not match the manifest".to_string(),
                });
            }
        }

        validate_invariants(&events)?;

        Ok(LoadedLog { events, manifest })
    }

    /// Append `batch` under `witness`'s lock. Events whose `dedupeKey`
    /// already exists anywhere in the log are silently dropped (the op is a
    /// no-op for those events only); `snapshot_exists` is consulted for every
    /// `node_created` event's `snapshotRef`.
    pub fn append(
        &self,
        witness: &LockWitness,
        batch: EventBatch,
        snapshot_exists: impl Fn(&SnapshotRef) -> bool,
    ) -> Result<AppendOutcome, EventLogError> {
        debug!(session_id = %witness.session_id(), "appending to event log");

        let loaded = self.load()?;
        let mut existing_dedupe: HashSet<String> =
            loaded.events.iter().map(|e| e.dedupe_key.clone()).collect();

        let mut next_index = loaded.manifest.next_event_index;
        let mut tail = loaded.manifest.tail_hash.clone();
        let first_ever_append = loaded.manifest.head_hash.is_none();
        let mut lines = Vec::new();
        let mut appended = Vec::new();

        for event in batch.events {
            if existing_dedupe.contains(event.dedupe_key.as_str()) {
                debug!(dedupe_key = %event.dedupe_key, "append is a no-op, dedupe key already committed");
                continue;
            }
            if event.event_index != next_index {
                return Err(EventLogError::InvariantViolation(format!(
                    "expected eventIndex {next_index}, got {}",
                    event.event_index
                )));
            }
            if let EventData::NodeCreated { snapshot_ref, .. } = &event.data {
                if !snapshot_exists(snapshot_ref) {
                    return Err(EventLogError::InvariantViolation(format!(
                        "snapshotRef {snapshot_ref} referenced by node_created does not exist"
                    )));
                }
            }

            let bytes = canonicalize_serializable(&event)
                .map_err(|e| EventLogError::InvariantViolation(e.to_string()))?;
            tail = Some(fold_tail(tail.as_ref(), &bytes));
            lines.push(bytes);
            next_index += 1;
            existing_dedupe.insert(event.dedupe_key.clone());
            appended.push(event);
        }

        if appended.is_empty() {
            return Ok(AppendOutcome { appended });
        }

        fs::create_dir_all(&self.session_dir)?;
        {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.events_path())?;
            for line in &lines {
                file.write_all(line)?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }

        let mut manifest = loaded.manifest;
        if first_ever_append {
            manifest.head_hash = tail.clone();
        }
        manifest.tail_hash = tail;
        manifest.next_event_index = next_index;
        manifest.snapshot_pins.extend(batch.snapshot_pins);
        self.write_manifest(&manifest)?;

        Ok(AppendOutcome { appended })
    }

    fn read_manifest(&self) -> Result<Manifest, EventLogError> {
        match fs::read(self.manifest_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| EventLogError::InvariantViolation(format!("malformed manifest: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<(), EventLogError> {
        let bytes = serde_json::to_vec_pretty(manifest)
            .map_err(|e| EventLogError::InvariantViolation(format!("unserializable manifest: {e}")))?;
        let tmp_path = self
            .session_dir
            .join(format!(".manifest.json.tmp-{}", std::process::id()));
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, self.manifest_path())?;
        if let Ok(dir) = File::open(&self.session_dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn read_events(&self) -> Result<Vec<DomainEvent>, EventLogError> {
        let bytes = match fs::read_to_string(self.events_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        bytes
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| EventLogError::InvariantViolation(format!("malformed event line: {e}")))
            })
            .collect()
    }
}

fn fold_tail(prev: Option<&Sha256Digest>, bytes: &[u8]) -> Sha256Digest {
    match prev {
        None => sha256(bytes),
        Some(prev) => {
            let mut folded = Vec::with_capacity(prev.hex().len() + bytes.len());
            folded.extend_from_slice(prev.hex().as_bytes());
            folded.extend_from_slice(bytes);
            sha256(&folded)
        }
    }
}

fn recompute_chain(events: &[DomainEvent]) -> Result<(Sha256Digest, Sha256Digest), EventLogError> {
    let mut tail: Option<Sha256Digest> = None;
    let mut head: Option<Sha256Digest> = None;
    for event in events {
        let bytes = canonicalize_serializable(event)
            .map_err(|e| EventLogError::InvariantViolation(e.to_string()))?;
        let next_tail = fold_tail(tail.as_ref(), &bytes);
        if head.is_none() {
            head = Some(next_tail.clone());
        }
        tail = Some(next_tail);
    }
    Ok((head.expect("non-empty events"), tail.expect("non-empty events")))
}

/// Validate the structural invariants over a fully-read event stream:
/// contiguous event indices, exactly one leading `session_created`, unique
/// dedupe keys, edges referencing only known nodes, and advanced outcomes
/// backed by a node/edge pair. Snapshot-ref existence is checked at append
/// time against the live snapshot/workflow stores instead, since that
/// requires consulting state outside the log itself.
fn validate_invariants(events: &[DomainEvent]) -> Result<(), EventLogError> {
    if events.is_empty() {
        return Ok(());
    }

    if !matches!(events[0].data, EventData::SessionCreated) || events[0].event_index != 0 {
        return Err(EventLogError::InvariantViolation(
            "event 0 must be session_created".to_string(),
        ));
    }

    let mut session_created_count = 0usize;
    let mut seen_dedupe = HashSet::new();
    let mut node_ids: HashSet<NodeId> = HashSet::new();
    let mut edge_targets: HashSet<NodeId> = HashSet::new();

    for (i, event) in events.iter().enumerate() {
        if event.event_index != i as u64 {
            return Err(EventLogError::InvariantViolation(format!(
                "eventIndex {} is not contiguous at position {i}",
                event.event_index
            )));
        }
        if matches!(event.data, EventData::SessionCreated) {
            session_created_count += 1;
        }
        if !seen_dedupe.insert(event.dedupe_key.clone()) {
            return Err(EventLogError::InvariantViolation(format!(
                "duplicate dedupeKey {}",
                event.dedupe_key
            )));
        }
        if matches!(event.data, EventData::NodeCreated { .. }) {
            if let Some(node_id) = &event.scope.node_id {
                node_ids.insert(node_id.clone());
            }
        }
        if let EventData::EdgeCreated { to_node_id, .. } = &event.data {
            edge_targets.insert(to_node_id.clone());
        }
    }

    if session_created_count != 1 {
        return Err(EventLogError::InvariantViolation(format!(
            "expected exactly one session_created, found {session_created_count}"
        )));
    }

    for event in events {
        if let EventData::EdgeCreated {
            from_node_id,
            to_node_id,
            ..
        } = &event.data
        {
            if !node_ids.contains(from_node_id) || !node_ids.contains(to_node_id) {
                return Err(EventLogError::InvariantViolation(format!(
                    "edge_created references a node absent from node_created ({from_node_id} -> {to_node_id})"
                )));
            }
        }
        if let EventData::AdvanceRecorded {
            outcome: meridian_types::AdvanceOutcome::Advanced { to_node_id },
            ..
        } = &event.data
        {
            if !node_ids.contains(to_node_id) || !edge_targets.contains(to_node_id) {
                return Err(EventLogError::InvariantViolation(format!(
                    "advanced outcome to {to_node_id} is missing its node_created/edge_created pair"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::{
        AdvanceOutcome, DomainEvent, EdgeCause, EdgeKind, EventData, EventScope, NodeKind,
        SessionId,
    };

    fn session_created(session_id: &SessionId) -> DomainEvent {
        DomainEvent {
            event_index: 0,
            event_id: meridian_types::EventId::new(),
            session_id: session_id.clone(),
            dedupe_key: "session_created".to_string(),
            scope: EventScope::default(),
            data: EventData::SessionCreated,
        }
    }

    #[test]
    fn load_on_a_fresh_directory_is_an_empty_healthy_log() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();
        let log = EventLog::at(dir.path(), &session);
        let loaded = log.load().unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.manifest.health, Health::Healthy);
    }

    #[test]
    fn append_then_load_round_trips_and_passes_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();
        let log = EventLog::at(dir.path(), &session);
        let witness = LockWitness::new(session.clone(), 0);

        let outcome = log
            .append(
                &witness,
                EventBatch {
                    events: vec![session_created(&session)],
                    snapshot_pins: vec![],
                },
                |_| true,
            )
            .unwrap();
        assert_eq!(outcome.appended.len(), 1);

        let loaded = log.load().unwrap();
        assert_eq!(loaded.events.len(), 1);
        assert_eq!(loaded.manifest.next_event_index, 1);
        assert!(loaded.manifest.head_hash.is_some());
        assert_eq!(loaded.manifest.head_hash, loaded.manifest.tail_hash);
    }

    #[test]
    fn appending_a_duplicate_dedupe_key_is_a_silent_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();
        let log = EventLog::at(dir.path(), &session);
        let witness = LockWitness::new(session.clone(), 0);

        log.append(
            &witness,
            EventBatch {
                events: vec![session_created(&session)],
                snapshot_pins: vec![],
            },
            |_| true,
        )
        .unwrap();

        let mut duplicate = session_created(&session);
        duplicate.event_index = 1;
        let outcome = log
            .append(
                &witness,
                EventBatch {
                    events: vec![duplicate],
                    snapshot_pins: vec![],
                },
                |_| true,
            )
            .unwrap();
        assert!(outcome.appended.is_empty());

        let loaded = log.load().unwrap();
        assert_eq!(loaded.events.len(), 1);
    }

    #[test]
    fn a_flipped_tail_hash_byte_is_detected_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();
        let log = EventLog::at(dir.path(), &session);
        let witness = LockWitness::new(session.clone(), 0);
        log.append(
            &witness,
            EventBatch {
                events: vec![session_created(&session)],
                snapshot_pins: vec![],
            },
            |_| true,
        )
        .unwrap();

        let manifest_path = dir.path().join("sessions").join(session.as_str()).join("manifest.json");
        let mut manifest: Manifest =
            serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
        let mut bad_hex = manifest.tail_hash.as_ref().unwrap().hex().to_string();
        bad_hex.replace_range(0..1, if &bad_hex[0..1] == "0" { "1" } else { "0" });
        manifest.tail_hash = Some(Sha256Digest::from_hex(bad_hex));
        fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();

        let err = log.load().unwrap_err();
        assert!(matches!(
            err,
            EventLogError::Corruption {
                location: CorruptionLocation::Tail,
                ..
            }
        ));
    }

    #[test]
    fn out_of_order_event_index_is_rejected_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();
        let log = EventLog::at(dir.path(), &session);
        let witness = LockWitness::new(session.clone(), 0);

        let mut skipped = session_created(&session);
        skipped.event_index = 5;
        let err = log
            .append(
                &witness,
                EventBatch {
                    events: vec![skipped],
                    snapshot_pins: vec![],
                },
                |_| true,
            )
            .unwrap_err();
        assert!(matches!(err, EventLogError::InvariantViolation(_)));
    }

    #[test]
    fn node_created_is_rejected_when_its_snapshot_ref_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();
        let log = EventLog::at(dir.path(), &session);
        let witness = LockWitness::new(session.clone(), 0);

        let node_id = meridian_types::NodeId::new();
        let node_created = DomainEvent {
            event_index: 1,
            event_id: meridian_types::EventId::new(),
            session_id: session.clone(),
            dedupe_key: "node_created:1".to_string(),
            scope: EventScope {
                run_id: None,
                node_id: Some(node_id),
            },
            data: EventData::NodeCreated {
                node_kind: NodeKind::Step,
                parent_node_id: None,
                workflow_hash: meridian_types::WorkflowHash::from_digest(
                    Sha256Digest::from_hex("a".repeat(64)),
                ),
                snapshot_ref: meridian_types::SnapshotRef::new(),
            },
        };

        log.append(
            &witness,
            EventBatch {
                events: vec![session_created(&session)],
                snapshot_pins: vec![],
            },
            |_| true,
        )
        .unwrap();

        let err = log
            .append(
                &witness,
                EventBatch {
                    events: vec![node_created],
                    snapshot_pins: vec![],
                },
                |_| false,
            )
            .unwrap_err();
        assert!(matches!(err, EventLogError::InvariantViolation(_)));
    }

    #[test]
    fn edge_created_referencing_an_unknown_node_is_rejected_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();
        let events_path = dir.path().join("sessions").join(session.as_str()).join("events.log");
        fs::create_dir_all(events_path.parent().unwrap()).unwrap();

        let bogus_edge = DomainEvent {
            event_index: 1,
            event_id: meridian_types::EventId::new(),
            session_id: session.clone(),
            dedupe_key: "edge:1".to_string(),
            scope: EventScope::default(),
            data: EventData::EdgeCreated {
                edge_kind: EdgeKind::AckedStep,
                from_node_id: meridian_types::NodeId::new(),
                to_node_id: meridian_types::NodeId::new(),
                cause: EdgeCause::NonTipAdvance {
                    event_id: meridian_types::EventId::new(),
                },
            },
        };

        let log = EventLog::at(dir.path(), &session);
        let witness = LockWitness::new(session.clone(), 0);
        log.append(
            &witness,
            EventBatch {
                events: vec![session_created(&session)],
                snapshot_pins: vec![],
            },
            |_| true,
        )
        .unwrap();
        // Hand-append the bogus edge bypassing `append`'s own checks, to prove
        // `load` independently catches a dangling edge reference written by
        // a buggy writer.
        let bytes = canonicalize_serializable(&bogus_edge).unwrap();
        let mut file = OpenOptions::new().append(true).open(&events_path).unwrap();
        file.write_all(&bytes).unwrap();
        file.write_all(b"\n").unwrap();
        drop(file);

        let manifest_path = dir.path().join("sessions").join(session.as_str()).join("manifest.json");
        let mut manifest: Manifest =
            serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
        let events = log_events_only(&events_path);
        let (head, tail) = recompute_chain(&events).unwrap();
        manifest.head_hash = Some(head);
        manifest.tail_hash = Some(tail);
        manifest.next_event_index = 2;
        fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();

        let err = log.load().unwrap_err();
        assert!(matches!(err, EventLogError::InvariantViolation(_)));
    }

    fn log_events_only(path: &std::path::Path) -> Vec<DomainEvent> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn different_attempts_against_the_same_node_have_distinct_dedupe_keys() {
        // advance_recorded dedupe keys are `{sessionId}:{nodeId}:{attemptId}`
        // scoped, so two distinct attempts never collide.
        let session = SessionId::parse("sess_a").unwrap();
        let node = NodeId::parse("node_b").unwrap();
        let a1 = meridian_types::AttemptId::parse("att_1").unwrap();
        let a2 = meridian_types::AttemptId::parse("att_2").unwrap();
        assert_ne!(
            DomainEvent::advance_dedupe_key(&session, &node, &a1),
            DomainEvent::advance_dedupe_key(&session, &node, &a2)
        );
        let _ = AdvanceOutcome::Blocked { blockers: vec![] };
    }
}
