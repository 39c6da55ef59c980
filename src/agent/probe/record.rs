use crate::agent::engine::{AddressInfo, ContextKey, Engine, DECODE_ERROR, PREFIX_LEN};

use thiserror::Error;
use tracing::trace;

// Record kinds, these must match `http_red.h`
pub const RECORD_ACCEPT_ENTRY: u32 = 1;
pub const RECORD_ACCEPT_EXIT: u32 = 2;
pub const RECORD_WRITE_ENTRY: u32 = 3;
pub const RECORD_CLOSE_ENTRY: u32 = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record is {len} bytes, expected at least {expected}")]
    Truncated { len: usize, expected: usize },
    #[error("unknown record kind: {0}")]
    UnknownKind(u32),
    #[error("prefix length {0} exceeds the prefix buffer")]
    PrefixLength(u32),
    #[error("descriptor out of range: {0}")]
    Descriptor(i64),
}

/// The fixed-size record written to the ring buffer by the kernel side.
///
/// The layout is shared with `struct http_red_record` in `http_red.h`. For
/// accept exits `fd` carries the syscall return value.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawRecord {
    pub kind: u32,
    pub prefix_len: u32,
    pub pid_tgid: u64,
    pub fd: i64,
    pub count: u64,
    pub addr: u64,
    pub addrlen: u64,
    pub prefix: [u8; PREFIX_LEN],
}

unsafe impl plain::Plain for RawRecord {}

impl Default for RawRecord {
    fn default() -> Self {
        Self {
            kind: 0,
            prefix_len: 0,
            pid_tgid: 0,
            fd: 0,
            count: 0,
            addr: 0,
            addrlen: 0,
            prefix: [0; PREFIX_LEN],
        }
    }
}

impl RawRecord {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut record = Self::default();

        plain::copy_from_bytes(&mut record, data).map_err(|_| DecodeError::Truncated {
            len: data.len(),
            expected: std::mem::size_of::<Self>(),
        })?;

        if record.prefix_len as usize > PREFIX_LEN {
            return Err(DecodeError::PrefixLength(record.prefix_len));
        }

        match record.kind {
            RECORD_ACCEPT_ENTRY | RECORD_ACCEPT_EXIT => Ok(record),
            RECORD_WRITE_ENTRY | RECORD_CLOSE_ENTRY => {
                record.descriptor()?;
                Ok(record)
            }
            kind => Err(DecodeError::UnknownKind(kind)),
        }
    }

    pub fn ctx(&self) -> ContextKey {
        ContextKey::from_raw(self.pid_tgid)
    }

    /// The captured leading bytes of a write.
    pub fn payload(&self) -> &[u8] {
        &self.prefix[..(self.prefix_len as usize).min(PREFIX_LEN)]
    }

    fn descriptor(&self) -> Result<u32, DecodeError> {
        u32::try_from(self.fd).map_err(|_| DecodeError::Descriptor(self.fd))
    }

    fn address(&self) -> AddressInfo {
        AddressInfo {
            addr: self.addr,
            addrlen: self.addrlen,
        }
    }

    /// Delivers the record straight to the engine without an intermediate
    /// event. Only valid for records returned by `decode`.
    fn apply(&self, engine: &Engine) {
        let ctx = self.ctx();

        match self.kind {
            RECORD_ACCEPT_ENTRY => engine.on_accept_entry(ctx, self.address()),
            RECORD_ACCEPT_EXIT => engine.on_accept_exit(ctx, self.fd),
            RECORD_WRITE_ENTRY => {
                if let Ok(fd) = self.descriptor() {
                    let count = usize::try_from(self.count).unwrap_or(usize::MAX);
                    engine.on_write_entry(ctx, fd, self.payload(), count);
                }
            }
            RECORD_CLOSE_ENTRY => {
                if let Ok(fd) = self.descriptor() {
                    engine.on_close_entry(ctx, fd);
                }
            }
            _ => {}
        }
    }
}

/// Ring buffer callback body. Malformed records are counted and skipped.
pub fn dispatch_record(engine: &Engine, data: &[u8]) -> i32 {
    match RawRecord::decode(data) {
        Ok(record) => record.apply(engine),
        Err(e) => {
            trace!("dropping probe record: {e}");
            DECODE_ERROR.increment();
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::engine::{Settings, StatusClass};

    fn encode(record: &RawRecord) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(std::mem::size_of::<RawRecord>());
        bytes.extend_from_slice(&record.kind.to_ne_bytes());
        bytes.extend_from_slice(&record.prefix_len.to_ne_bytes());
        bytes.extend_from_slice(&record.pid_tgid.to_ne_bytes());
        bytes.extend_from_slice(&record.fd.to_ne_bytes());
        bytes.extend_from_slice(&record.count.to_ne_bytes());
        bytes.extend_from_slice(&record.addr.to_ne_bytes());
        bytes.extend_from_slice(&record.addrlen.to_ne_bytes());
        bytes.extend_from_slice(&record.prefix);
        bytes.resize(std::mem::size_of::<RawRecord>(), 0);
        bytes
    }

    fn record(kind: u32, ctx: ContextKey, fd: i64) -> RawRecord {
        RawRecord {
            kind,
            pid_tgid: ctx.as_raw(),
            fd,
            ..Default::default()
        }
    }

    fn write_record(ctx: ContextKey, fd: i64, payload: &[u8]) -> RawRecord {
        let mut r = record(RECORD_WRITE_ENTRY, ctx, fd);
        r.prefix[..payload.len()].copy_from_slice(payload);
        r.prefix_len = payload.len() as u32;
        r.count = payload.len() as u64;
        r
    }

    #[test]
    fn record_layout() {
        assert_eq!(std::mem::size_of::<RawRecord>(), 352);
        assert_eq!(std::mem::align_of::<RawRecord>(), 8);
    }

    #[test]
    fn decode_write() {
        let ctx = ContextKey::new(300, 301);
        let bytes = encode(&write_record(ctx, 9, b"HTTP/1.1 204 No Content\r\n"));

        let record = RawRecord::decode(&bytes).unwrap();
        assert_eq!(record.ctx(), ctx);
        assert_eq!(record.payload(), b"HTTP/1.1 204 No Content\r\n");
        assert_eq!(record.descriptor(), Ok(9));
        assert_eq!(record.count, 25);
    }

    #[test]
    fn decode_errors() {
        let ctx = ContextKey::new(1, 1);

        let bytes = encode(&record(RECORD_CLOSE_ENTRY, ctx, 3));
        assert_eq!(
            RawRecord::decode(&bytes[..100]).err(),
            Some(DecodeError::Truncated {
                len: 100,
                expected: 352
            })
        );

        let bytes = encode(&record(99, ctx, 3));
        assert_eq!(
            RawRecord::decode(&bytes).err(),
            Some(DecodeError::UnknownKind(99))
        );

        let mut bad = record(RECORD_WRITE_ENTRY, ctx, 3);
        bad.prefix_len = PREFIX_LEN as u32 + 1;
        assert_eq!(
            RawRecord::decode(&encode(&bad)).err(),
            Some(DecodeError::PrefixLength(PREFIX_LEN as u32 + 1))
        );

        let bytes = encode(&record(RECORD_CLOSE_ENTRY, ctx, -1));
        assert_eq!(
            RawRecord::decode(&bytes).err(),
            Some(DecodeError::Descriptor(-1))
        );

        // a failed accept is a valid record
        let bytes = encode(&record(RECORD_ACCEPT_EXIT, ctx, -11));
        assert!(RawRecord::decode(&bytes).is_ok());
    }

    #[test]
    fn records_drive_engine() {
        let engine = Engine::new(Settings::default());
        let ctx = ContextKey::new(500, 501);

        let records = [
            record(RECORD_ACCEPT_ENTRY, ctx, 0),
            record(RECORD_ACCEPT_EXIT, ctx, 12),
            write_record(ctx, 12, b"HTTP/1.1 302 Found\r\n"),
            record(RECORD_CLOSE_ENTRY, ctx, 12),
        ];

        for r in &records {
            assert_eq!(dispatch_record(&engine, &encode(r)), 0);
        }

        // garbage is skipped
        assert_eq!(dispatch_record(&engine, &[0xff; 16]), 0);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.process(500).connections_started, 1);
        assert_eq!(snapshot.process(500).connections_closed, 1);
        assert_eq!(snapshot.responses(500, StatusClass::new(b'3')), 1);
    }
}
