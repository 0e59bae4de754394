mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::EngineError;
pub use mutations::CreateOptions;
pub use store::BookingStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::SharedClock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<ResourceCalendar>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        /// Append counter observed before the snapshot was taken. The writer
        /// refuses the rewrite when the live counter differs — an append
        /// committed mid-snapshot and the events would erase it.
        expected_appends: u64,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact {
            events,
            expected_appends,
            response,
        } => {
            let result = if wal.appends_since_compact() != expected_appends {
                Err(io::Error::other("appends landed during the snapshot"))
            } else {
                Wal::write_compact_file(wal.path(), &events)
                    .and_then(|()| wal.swap_compact_file())
            };
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking lifecycle engine. All state lives in the store; durability is
/// the WAL. Each mutation holds the target calendar's write lock across the
/// whole conflict-check-and-commit, which is what keeps two racing approvals
/// from both landing on the same slot.
pub struct Engine {
    pub store: BookingStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: SharedClock,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, clock: SharedClock) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: BookingStore::new(),
            wal_tx,
            notify,
            clock,
        };

        // Replay — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use
        // blocking_read/blocking_write here because this may run inside an
        // async context.
        for event in &events {
            match event {
                Event::ResourcePurged { resource_id } => {
                    if let Some(cal) = engine.store.remove_calendar(resource_id) {
                        let guard = cal.try_read().expect("replay: uncontended read");
                        engine.store.forget_bookings(&guard.bookings);
                    }
                }
                other => {
                    let resource_id = event_resource_id(other);
                    let cal = engine.store.calendar_or_create(resource_id);
                    let mut guard = cal.try_write().expect("replay: uncontended write");
                    engine.store.apply_event(&mut guard, other);
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// WAL-append + apply + notify in one call, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        resource_id: Ulid,
        cal: &mut ResourceCalendar,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(cal, event);
        self.notify.send(resource_id, event);
        Ok(())
    }

    /// Lookup booking → resource, get calendar, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceCalendar>), EngineError> {
        let resource_id = self
            .store
            .resource_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let cal = self
            .store
            .calendar(&resource_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = cal.write_owned().await;
        // A purge may have erased the booking while we waited on the lock;
        // committing a transition into the orphaned calendar would append a
        // dangling event for a resource that no longer exists.
        if self.store.resource_for_booking(booking_id) != Some(resource_id) {
            return Err(EngineError::NotFound(*booking_id));
        }
        Ok((resource_id, guard))
    }

    /// The engine's view of "now" — always the injected clock.
    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }
}

/// Extract the resource_id from a non-purge event.
fn event_resource_id(event: &Event) -> Ulid {
    match event {
        Event::BookingCreated { resource_id, .. }
        | Event::BookingApproved { resource_id, .. }
        | Event::BookingRejected { resource_id, .. }
        | Event::BookingCancelled { resource_id, .. }
        | Event::BookingCompleted { resource_id, .. }
        | Event::RequesterDetached { resource_id, .. }
        | Event::ResourcePurged { resource_id } => *resource_id,
    }
}
