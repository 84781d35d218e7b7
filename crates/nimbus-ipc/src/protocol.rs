//! Worker command/event wire protocol.
//!
//! Messages travel as single ring records. Encoding is a little-endian
//! tag (u16) followed by the payload fields; byte vectors and strings are
//! u32-length-prefixed. The protocol is versionless by design: unknown
//! tags are a decode error and the coordinator/worker pair ship together.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Cpu,
    Gpu,
    Io,
    Net,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 4] = [
        WorkerRole::Cpu,
        WorkerRole::Gpu,
        WorkerRole::Io,
        WorkerRole::Net,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            WorkerRole::Cpu => 0,
            WorkerRole::Gpu => 1,
            WorkerRole::Io => 2,
            WorkerRole::Net => 3,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(WorkerRole::Cpu),
            1 => Some(WorkerRole::Gpu),
            2 => Some(WorkerRole::Io),
            3 => Some(WorkerRole::Net),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WorkerRole::Cpu => "cpu",
            WorkerRole::Gpu => "gpu",
            WorkerRole::Io => "io",
            WorkerRole::Net => "net",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nop { seq: u32 },
    Init { role: WorkerRole },
    ConfigUpdate { version: u32, json: Vec<u8> },
    Tick { frame_id: u64 },
    SubmitGpu { fence: u64, data: Vec<u8> },
    Screenshot { request_id: u64 },
    InputBatch { data: Vec<u8> },
    VmPause { request_id: u64 },
    VmResume { request_id: u64 },
    VmSave { request_id: u64, path: String },
    VmRestore { request_id: u64, path: String },
    Shutdown,
}

/// Error detail carried by failed snapshot RPC replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure {
    pub name: String,
    pub message: String,
}

/// One restored device blob, canonical-kind form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredBlob {
    pub kind: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ready {
        role: WorkerRole,
    },
    ConfigAck {
        version: u32,
    },
    SubmitComplete {
        fence: u64,
    },
    ScreenshotDone {
        request_id: u64,
        ok: bool,
    },
    VmPaused {
        request_id: u64,
        ok: bool,
        error: Option<RpcFailure>,
    },
    VmResumed {
        request_id: u64,
        ok: bool,
        error: Option<RpcFailure>,
    },
    VmSaved {
        request_id: u64,
        ok: bool,
        error: Option<RpcFailure>,
    },
    VmRestored {
        request_id: u64,
        ok: bool,
        error: Option<RpcFailure>,
        cpu: Vec<u8>,
        mmu: Vec<u8>,
        devices: Vec<RestoredBlob>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown message tag")]
    UnknownTag,
    #[error("truncated message")]
    Truncated,
    #[error("invalid field: {0}")]
    Invalid(&'static str),
}

mod tag {
    pub mod cmd {
        pub const NOP: u16 = 1;
        pub const INIT: u16 = 2;
        pub const CONFIG_UPDATE: u16 = 3;
        pub const TICK: u16 = 4;
        pub const SUBMIT_GPU: u16 = 5;
        pub const SCREENSHOT: u16 = 6;
        pub const INPUT_BATCH: u16 = 7;
        pub const VM_PAUSE: u16 = 8;
        pub const VM_RESUME: u16 = 9;
        pub const VM_SAVE: u16 = 10;
        pub const VM_RESTORE: u16 = 11;
        pub const SHUTDOWN: u16 = 12;
    }
    pub mod evt {
        pub const READY: u16 = 1;
        pub const CONFIG_ACK: u16 = 2;
        pub const SUBMIT_COMPLETE: u16 = 3;
        pub const SCREENSHOT_DONE: u16 = 4;
        pub const VM_PAUSED: u16 = 5;
        pub const VM_RESUMED: u16 = 6;
        pub const VM_SAVED: u16 = 7;
        pub const VM_RESTORED: u16 = 8;
        pub const ERROR: u16 = 9;
    }
}

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn new(tag: u16) -> Self {
        Self {
            out: tag.to_le_bytes().to_vec(),
        }
    }

    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.out.extend_from_slice(v);
    }

    fn string(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        String::from_utf8(self.bytes()?).map_err(|_| DecodeError::Invalid("utf-8"))
    }

    fn role(&mut self) -> Result<WorkerRole, DecodeError> {
        WorkerRole::from_u8(self.u8()?).ok_or(DecodeError::Invalid("role"))
    }

    fn finish(self) -> Result<(), DecodeError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DecodeError::Invalid("trailing bytes"))
        }
    }
}

pub fn encode_command(cmd: &Command) -> Vec<u8> {
    use tag::cmd::*;
    let mut w;
    match cmd {
        Command::Nop { seq } => {
            w = Writer::new(NOP);
            w.u32(*seq);
        }
        Command::Init { role } => {
            w = Writer::new(INIT);
            w.u8(role.as_u8());
        }
        Command::ConfigUpdate { version, json } => {
            w = Writer::new(CONFIG_UPDATE);
            w.u32(*version);
            w.bytes(json);
        }
        Command::Tick { frame_id } => {
            w = Writer::new(TICK);
            w.u64(*frame_id);
        }
        Command::SubmitGpu { fence, data } => {
            w = Writer::new(SUBMIT_GPU);
            w.u64(*fence);
            w.bytes(data);
        }
        Command::Screenshot { request_id } => {
            w = Writer::new(SCREENSHOT);
            w.u64(*request_id);
        }
        Command::InputBatch { data } => {
            w = Writer::new(INPUT_BATCH);
            w.bytes(data);
        }
        Command::VmPause { request_id } => {
            w = Writer::new(VM_PAUSE);
            w.u64(*request_id);
        }
        Command::VmResume { request_id } => {
            w = Writer::new(VM_RESUME);
            w.u64(*request_id);
        }
        Command::VmSave { request_id, path } => {
            w = Writer::new(VM_SAVE);
            w.u64(*request_id);
            w.string(path);
        }
        Command::VmRestore { request_id, path } => {
            w = Writer::new(VM_RESTORE);
            w.u64(*request_id);
            w.string(path);
        }
        Command::Shutdown => {
            w = Writer::new(SHUTDOWN);
        }
    }
    w.out
}

pub fn decode_command(buf: &[u8]) -> Result<Command, DecodeError> {
    use tag::cmd::*;
    let mut r = Reader::new(buf);
    let cmd = match r.u16()? {
        NOP => Command::Nop { seq: r.u32()? },
        INIT => Command::Init { role: r.role()? },
        CONFIG_UPDATE => Command::ConfigUpdate {
            version: r.u32()?,
            json: r.bytes()?,
        },
        TICK => Command::Tick { frame_id: r.u64()? },
        SUBMIT_GPU => Command::SubmitGpu {
            fence: r.u64()?,
            data: r.bytes()?,
        },
        SCREENSHOT => Command::Screenshot {
            request_id: r.u64()?,
        },
        INPUT_BATCH => Command::InputBatch { data: r.bytes()? },
        VM_PAUSE => Command::VmPause {
            request_id: r.u64()?,
        },
        VM_RESUME => Command::VmResume {
            request_id: r.u64()?,
        },
        VM_SAVE => Command::VmSave {
            request_id: r.u64()?,
            path: r.string()?,
        },
        VM_RESTORE => Command::VmRestore {
            request_id: r.u64()?,
            path: r.string()?,
        },
        SHUTDOWN => Command::Shutdown,
        _ => return Err(DecodeError::UnknownTag),
    };
    r.finish()?;
    Ok(cmd)
}

fn write_failure(w: &mut Writer, error: &Option<RpcFailure>) {
    match error {
        None => w.u8(0),
        Some(f) => {
            w.u8(1);
            w.string(&f.name);
            w.string(&f.message);
        }
    }
}

fn read_failure(r: &mut Reader<'_>) -> Result<Option<RpcFailure>, DecodeError> {
    match r.u8()? {
        0 => Ok(None),
        1 => Ok(Some(RpcFailure {
            name: r.string()?,
            message: r.string()?,
        })),
        _ => Err(DecodeError::Invalid("failure flag")),
    }
}

pub fn encode_event(evt: &Event) -> Vec<u8> {
    use tag::evt::*;
    let mut w;
    match evt {
        Event::Ready { role } => {
            w = Writer::new(READY);
            w.u8(role.as_u8());
        }
        Event::ConfigAck { version } => {
            w = Writer::new(CONFIG_ACK);
            w.u32(*version);
        }
        Event::SubmitComplete { fence } => {
            w = Writer::new(SUBMIT_COMPLETE);
            w.u64(*fence);
        }
        Event::ScreenshotDone { request_id, ok } => {
            w = Writer::new(SCREENSHOT_DONE);
            w.u64(*request_id);
            w.u8(*ok as u8);
        }
        Event::VmPaused {
            request_id,
            ok,
            error,
        } => {
            w = Writer::new(VM_PAUSED);
            w.u64(*request_id);
            w.u8(*ok as u8);
            write_failure(&mut w, error);
        }
        Event::VmResumed {
            request_id,
            ok,
            error,
        } => {
            w = Writer::new(VM_RESUMED);
            w.u64(*request_id);
            w.u8(*ok as u8);
            write_failure(&mut w, error);
        }
        Event::VmSaved {
            request_id,
            ok,
            error,
        } => {
            w = Writer::new(VM_SAVED);
            w.u64(*request_id);
            w.u8(*ok as u8);
            write_failure(&mut w, error);
        }
        Event::VmRestored {
            request_id,
            ok,
            error,
            cpu,
            mmu,
            devices,
        } => {
            w = Writer::new(VM_RESTORED);
            w.u64(*request_id);
            w.u8(*ok as u8);
            write_failure(&mut w, error);
            w.bytes(cpu);
            w.bytes(mmu);
            w.u32(devices.len() as u32);
            for blob in devices {
                w.string(&blob.kind);
                w.bytes(&blob.data);
            }
        }
        Event::Error { message } => {
            w = Writer::new(ERROR);
            w.string(message);
        }
    }
    w.out
}

pub fn decode_event(buf: &[u8]) -> Result<Event, DecodeError> {
    use tag::evt::*;
    let mut r = Reader::new(buf);
    let evt = match r.u16()? {
        READY => Event::Ready { role: r.role()? },
        CONFIG_ACK => Event::ConfigAck { version: r.u32()? },
        SUBMIT_COMPLETE => Event::SubmitComplete { fence: r.u64()? },
        SCREENSHOT_DONE => Event::ScreenshotDone {
            request_id: r.u64()?,
            ok: r.u8()? != 0,
        },
        VM_PAUSED => Event::VmPaused {
            request_id: r.u64()?,
            ok: r.u8()? != 0,
            error: read_failure(&mut r)?,
        },
        VM_RESUMED => Event::VmResumed {
            request_id: r.u64()?,
            ok: r.u8()? != 0,
            error: read_failure(&mut r)?,
        },
        VM_SAVED => Event::VmSaved {
            request_id: r.u64()?,
            ok: r.u8()? != 0,
            error: read_failure(&mut r)?,
        },
        VM_RESTORED => {
            let request_id = r.u64()?;
            let ok = r.u8()? != 0;
            let error = read_failure(&mut r)?;
            let cpu = r.bytes()?;
            let mmu = r.bytes()?;
            let count = r.u32()? as usize;
            let mut devices = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                devices.push(RestoredBlob {
                    kind: r.string()?,
                    data: r.bytes()?,
                });
            }
            Event::VmRestored {
                request_id,
                ok,
                error,
                cpu,
                mmu,
                devices,
            }
        }
        ERROR => Event::Error {
            message: r.string()?,
        },
        _ => return Err(DecodeError::UnknownTag),
    };
    r.finish()?;
    Ok(evt)
}
