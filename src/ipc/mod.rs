//! Length-delimited IPC carried over the supervisor<->resolver pipe pair.
//!
//! Wire format: `func \0 arg1 \0 arg2 \0 ... \0 argN \n`. Only the
//! child->parent direction is framed; the parent->child pipe carries no
//! data and exists solely so the child can detect parent death on EOF.

use log::error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Lines longer than this are logged and discarded rather than buffered
/// without bound.
pub const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub func: String,
    pub argv: Vec<String>,
}

impl Frame {
    pub fn new<S: Into<String>>(func: S, argv: Vec<String>) -> Self {
        Self {
            func: func.into(),
            argv,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.func.len() + 1);
        buf.extend_from_slice(self.func.as_bytes());
        buf.push(0);
        for arg in &self.argv {
            buf.extend_from_slice(arg.as_bytes());
            buf.push(0);
        }
        buf.push(b'\n');
        buf
    }

    /// Parses one NUL-delimited line (without its trailing `\n`). Returns
    /// `None` for an empty or malformed line (func name of length <= 1) --
    /// the caller logs and discards these.
    pub fn decode(line: &[u8]) -> Option<Frame> {
        let fields: Vec<&[u8]> = line.split(|&b| b == 0).collect();
        let func = fields.first()?;
        if func.len() <= 1 {
            return None;
        }
        let func = String::from_utf8_lossy(func).into_owned();
        let mut rest = &fields[1..];
        // A trailing NUL before the newline produces one spurious empty
        // trailing field; drop it since the wire format always terminates
        // with a NUL before the LF.
        if rest.last().is_some_and(|f| f.is_empty()) {
            rest = &rest[..rest.len() - 1];
        }
        let argv = rest
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        Some(Frame { func, argv })
    }
}

/// Writes frames to the child->parent pipe. A short write or write error is
/// fatal to the writer process -- the peer will be respawned by the
/// supervisor.
pub struct Writer<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn call(&mut self, frame: Frame) -> std::io::Result<()> {
        let buf = frame.encode();
        self.inner.write_all(&buf).await?;
        self.inner.flush().await
    }

    /// Emits an `error` frame carrying `msg`, then returns. The caller is
    /// expected to terminate the process immediately afterwards -- this
    /// mirrors the source's `WriteFatal`, which logs the fatal reason to
    /// the supervisor before the child dies.
    pub async fn write_fatal(&mut self, msg: &str) {
        let frame = Frame::new("error", vec![msg.to_string()]);
        if let Err(e) = self.call(frame).await {
            error!("failed to report fatal error over ipc: {e}");
        }
    }
}

/// Reads frames from the parent's end of the child->parent pipe, one line
/// at a time, discarding malformed or oversized lines.
pub struct Reader<R> {
    inner: BufReader<R>,
}

impl<R: tokio::io::AsyncRead + Unpin> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Returns `Ok(None)` on EOF (peer pipe closed).
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            let mut line = Vec::new();
            let n = self.inner.read_until(b'\n', &mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.len() > MAX_LINE {
                error!("ipc line exceeded {MAX_LINE} bytes, discarding");
                continue;
            }
            match Frame::decode(&line) {
                Some(frame) => return Ok(Some(frame)),
                None => {
                    error!("got malformed ipc line: {:?}", String::from_utf8_lossy(&line));
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_func_and_argv() {
        let frame = Frame::new("addToTable", vec!["pf_table".into(), "10.0.0.1".into()]);
        let encoded = frame.encode();
        assert_eq!(encoded.last(), Some(&b'\n'));
        let decoded = Frame::decode(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trips_with_no_args() {
        let frame = Frame::new("startup", vec![]);
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn rejects_short_func_name() {
        assert!(Frame::decode(b"x\0arg").is_none());
        assert!(Frame::decode(b"").is_none());
    }

    #[test]
    fn decodes_flush_table_call() {
        let line = b"flushTable\0pf_table";
        let decoded = Frame::decode(line).unwrap();
        assert_eq!(decoded.func, "flushTable");
        assert_eq!(decoded.argv, vec!["pf_table".to_string()]);
    }
}
