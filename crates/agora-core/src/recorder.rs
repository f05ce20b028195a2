//! Event recording.
//!
//! The engine hands every committed [`Transaction`] and [`StateChange`] to
//! an [`EventRecorder`], which batches them and forwards batches to a
//! pluggable [`Backend`]. Recording is best-effort from the engine's point
//! of view: a failing backend is logged and counted, and the run is flagged
//! as having incomplete history, but the simulation continues.
//!
//! A tick never waits on more than one backend write, because the buffer is
//! flushed as soon as it reaches `batch_size` records.

use crate::commodity::Transaction;
use crate::fixed::Tick;
use crate::id::ModelId;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A change in the set of active models or in the run itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateChange {
    SimulationStarted {
        tick: Tick,
        duration: u64,
        decay: f64,
    },
    Deployed {
        tick: Tick,
        model: ModelId,
        name: String,
        impl_id: String,
        prototype: Option<String>,
        parent: Option<ModelId>,
    },
    Decommissioned {
        tick: Tick,
        model: ModelId,
        name: String,
    },
    SimulationEnded {
        tick: Tick,
        ticks_run: u64,
    },
}

/// One entry in the persisted event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Transaction(Transaction),
    StateChange(StateChange),
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("decoding failed: {0}")]
    Decode(String),
    #[error("not a record log (bad magic 0x{0:08X})")]
    BadMagic(u32),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Records buffered before a batch is written to the backend.
    pub batch_size: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self { batch_size: 256 }
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Durable storage for record batches.
pub trait Backend {
    fn write_batch(&mut self, records: &[Record]) -> Result<(), RecordError>;

    fn flush(&mut self) -> Result<(), RecordError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn write_batch(&mut self, _records: &[Record]) -> Result<(), RecordError> {
        Ok(())
    }
}

/// Keeps records in memory. Clones share the same log, so a caller can keep
/// one handle and give the other to the context.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    records: Rc<RefCell<Vec<Record>>>,
    batches: Rc<RefCell<u64>>,
    flushes: Rc<RefCell<u64>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.records
            .borrow()
            .iter()
            .filter_map(|r| match r {
                Record::Transaction(t) => Some(t.clone()),
                Record::StateChange(_) => None,
            })
            .collect()
    }

    pub fn state_changes(&self) -> Vec<StateChange> {
        self.records
            .borrow()
            .iter()
            .filter_map(|r| match r {
                Record::StateChange(s) => Some(s.clone()),
                Record::Transaction(_) => None,
            })
            .collect()
    }

    pub fn batch_count(&self) -> u64 {
        *self.batches.borrow()
    }

    pub fn flush_count(&self) -> u64 {
        *self.flushes.borrow()
    }
}

impl Backend for MemoryBackend {
    fn write_batch(&mut self, records: &[Record]) -> Result<(), RecordError> {
        self.records.borrow_mut().extend_from_slice(records);
        *self.batches.borrow_mut() += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecordError> {
        *self.flushes.borrow_mut() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Binary log backend
// ---------------------------------------------------------------------------

/// Magic number at the start of a binary record log.
pub const LOG_MAGIC: u32 = 0xA60A_0001;

/// Writes batches as length-prefixed `bitcode` frames:
/// `magic:u32` then repeated `len:u32, payload[len]`, little-endian.
#[derive(Debug)]
pub struct BinaryLogBackend<W: Write> {
    writer: W,
    header_written: bool,
}

impl<W: Write> BinaryLogBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ensure_header(&mut self) -> Result<(), RecordError> {
        if !self.header_written {
            self.writer.write_all(&LOG_MAGIC.to_le_bytes())?;
            self.header_written = true;
        }
        Ok(())
    }
}

impl BinaryLogBackend<std::io::BufWriter<std::fs::File>> {
    /// Create (or truncate) a log file at `path`.
    pub fn create(path: impl AsRef<std::path::Path>) -> Result<Self, RecordError> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(std::io::BufWriter::new(file)))
    }
}

impl<W: Write> Backend for BinaryLogBackend<W> {
    fn write_batch(&mut self, records: &[Record]) -> Result<(), RecordError> {
        self.ensure_header()?;
        let payload =
            bitcode::serialize(records).map_err(|e| RecordError::Encode(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| RecordError::Encode(format!("batch of {} bytes", payload.len())))?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecordError> {
        self.ensure_header()?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Read back every record from a binary log.
pub fn read_binary_log(mut reader: impl Read) -> Result<Vec<Record>, RecordError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let mut rest = bytes.as_slice();

    let magic = take_u32(&mut rest)?;
    if magic != LOG_MAGIC {
        return Err(RecordError::BadMagic(magic));
    }

    let mut records = Vec::new();
    while !rest.is_empty() {
        let len = take_u32(&mut rest)? as usize;
        if rest.len() < len {
            return Err(RecordError::Decode(format!(
                "truncated frame: need {len} bytes, have {}",
                rest.len()
            )));
        }
        let (frame, tail) = rest.split_at(len);
        let batch: Vec<Record> =
            bitcode::deserialize(frame).map_err(|e| RecordError::Decode(e.to_string()))?;
        records.extend(batch);
        rest = tail;
    }
    Ok(records)
}

fn take_u32(bytes: &mut &[u8]) -> Result<u32, RecordError> {
    if bytes.len() < 4 {
        return Err(RecordError::Decode("truncated header".to_string()));
    }
    let (head, tail) = bytes.split_at(4);
    *bytes = tail;
    Ok(u32::from_le_bytes([head[0], head[1], head[2], head[3]]))
}

// ---------------------------------------------------------------------------
// JSON lines backend
// ---------------------------------------------------------------------------

/// Writes one JSON object per record per line.
#[cfg(feature = "json-log")]
#[derive(Debug)]
pub struct JsonLinesBackend<W: Write> {
    writer: W,
}

#[cfg(feature = "json-log")]
impl<W: Write> JsonLinesBackend<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(feature = "json-log")]
impl<W: Write> Backend for JsonLinesBackend<W> {
    fn write_batch(&mut self, records: &[Record]) -> Result<(), RecordError> {
        for record in records {
            serde_json::to_writer(&mut self.writer, record)
                .map_err(|e| RecordError::Encode(e.to_string()))?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecordError> {
        self.writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EventRecorder
// ---------------------------------------------------------------------------

/// Buffers records and forwards them to a backend in batches.
pub struct EventRecorder {
    backend: Box<dyn Backend>,
    buffer: Vec<Record>,
    batch_size: usize,
    recorded: u64,
    lost: u64,
    failures: u64,
    closed: bool,
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("buffered", &self.buffer.len())
            .field("batch_size", &self.batch_size)
            .field("recorded", &self.recorded)
            .field("lost", &self.lost)
            .field("failures", &self.failures)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl EventRecorder {
    pub fn new(backend: Box<dyn Backend>, config: &RecorderConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            backend,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            recorded: 0,
            lost: 0,
            failures: 0,
            closed: false,
        }
    }

    /// Queue a record. Never fails; problems are logged and counted.
    pub fn record(&mut self, record: Record) {
        if self.closed {
            warn!("record dropped: recorder already closed");
            self.lost += 1;
            self.failures += 1;
            return;
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.write_buffer();
        }
    }

    fn write_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let n = self.buffer.len() as u64;
        match self.backend.write_batch(&self.buffer) {
            Ok(()) => self.recorded += n,
            Err(e) => {
                warn!(error = %e, records = n, "recording failure; history is incomplete");
                self.lost += n;
                self.failures += 1;
            }
        }
        self.buffer.clear();
    }

    /// Write whatever is buffered and ask the backend to flush.
    pub fn flush(&mut self) {
        self.write_buffer();
        if let Err(e) = self.backend.flush() {
            warn!(error = %e, "backend flush failed; history may be incomplete");
            self.failures += 1;
        }
    }

    /// Flush and stop accepting records. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.flush();
        self.closed = true;
        debug!(
            recorded = self.recorded,
            lost = self.lost,
            "event recorder closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records successfully handed to the backend.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Records that never reached the backend.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn history_incomplete(&self) -> bool {
        self.failures > 0
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commodity::Commodity;
    use crate::fixed::qty;
    use crate::test_utils::FailingBackend;
    use slotmap::SlotMap;

    fn sample_records(n: usize) -> Vec<Record> {
        let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
        let a = arena.insert(());
        let b = arena.insert(());
        (0..n)
            .map(|i| {
                Record::Transaction(Transaction {
                    tick: i as Tick,
                    sender: a,
                    receiver: b,
                    commodity: Commodity::new("milk", "kg"),
                    quantity: qty(50.0),
                })
            })
            .collect()
    }

    #[test]
    fn batches_at_batch_size() {
        let mem = MemoryBackend::new();
        let mut rec = EventRecorder::new(Box::new(mem.clone()), &RecorderConfig { batch_size: 3 });
        for r in sample_records(7) {
            rec.record(r);
        }
        assert_eq!(mem.batch_count(), 2);
        assert_eq!(mem.records().len(), 6);
        assert_eq!(rec.buffered(), 1);
        rec.close();
        assert_eq!(mem.records().len(), 7);
        assert_eq!(mem.flush_count(), 1);
        assert_eq!(rec.recorded(), 7);
        assert!(!rec.history_incomplete());
    }

    #[test]
    fn close_is_idempotent() {
        let mem = MemoryBackend::new();
        let mut rec = EventRecorder::new(Box::new(mem.clone()), &RecorderConfig::default());
        rec.record(sample_records(1).remove(0));
        rec.close();
        rec.close();
        assert_eq!(mem.flush_count(), 1);
        assert!(rec.is_closed());
    }

    #[test]
    fn drop_flushes_buffer() {
        let mem = MemoryBackend::new();
        {
            let mut rec = EventRecorder::new(Box::new(mem.clone()), &RecorderConfig::default());
            for r in sample_records(5) {
                rec.record(r);
            }
            assert!(mem.records().is_empty());
        }
        assert_eq!(mem.records().len(), 5);
    }

    #[test]
    fn failures_are_counted_not_raised() {
        let mut rec = EventRecorder::new(Box::new(FailingBackend), &RecorderConfig { batch_size: 2 });
        for r in sample_records(4) {
            rec.record(r);
        }
        rec.close();
        assert_eq!(rec.recorded(), 0);
        assert_eq!(rec.lost(), 4);
        assert!(rec.history_incomplete());
    }

    #[test]
    fn records_after_close_are_lost() {
        let mem = MemoryBackend::new();
        let mut rec = EventRecorder::new(Box::new(mem.clone()), &RecorderConfig::default());
        rec.close();
        rec.record(sample_records(1).remove(0));
        assert!(mem.records().is_empty());
        assert_eq!(rec.lost(), 1);
        assert!(rec.history_incomplete());
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let mem = MemoryBackend::new();
        let mut rec = EventRecorder::new(Box::new(mem.clone()), &RecorderConfig { batch_size: 0 });
        rec.record(sample_records(1).remove(0));
        assert_eq!(mem.batch_count(), 1);
    }

    #[test]
    fn binary_log_reads_back() {
        let mut backend = BinaryLogBackend::new(Vec::new());
        let records = sample_records(5);
        backend.write_batch(&records[..2]).unwrap();
        backend.write_batch(&records[2..]).unwrap();
        backend.flush().unwrap();
        let bytes = backend.into_inner();
        assert_eq!(read_binary_log(bytes.as_slice()).unwrap(), records);
    }

    #[test]
    fn empty_binary_log_has_header_only() {
        let mut backend = BinaryLogBackend::new(Vec::new());
        backend.flush().unwrap();
        let bytes = backend.into_inner();
        assert_eq!(bytes.len(), 4);
        assert!(read_binary_log(bytes.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn binary_log_rejects_bad_magic() {
        let bytes = 0xDEAD_BEEFu32.to_le_bytes();
        assert!(matches!(
            read_binary_log(&bytes[..]),
            Err(RecordError::BadMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn binary_log_rejects_truncated_frame() {
        let mut backend = BinaryLogBackend::new(Vec::new());
        backend.write_batch(&sample_records(3)).unwrap();
        let mut bytes = backend.into_inner();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            read_binary_log(bytes.as_slice()),
            Err(RecordError::Decode(_))
        ));
    }

    #[cfg(feature = "json-log")]
    #[test]
    fn json_lines_one_record_per_line() {
        let mut backend = JsonLinesBackend::new(Vec::new());
        backend.write_batch(&sample_records(3)).unwrap();
        let text = String::from_utf8(backend.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 3);
        for line in text.lines() {
            let record: Record = serde_json::from_str(line).unwrap();
            assert!(matches!(record, Record::Transaction(_)));
        }
    }
}
