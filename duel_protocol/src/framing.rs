// Newline-delimited message framing over TCP.
//
// Every frame is one JSON object followed by a single `\n`. Both
// `write_message` and `read_message` operate on raw `&[u8]` / `Vec<u8>`;
// the caller handles JSON serialization separately (see
// `message::send_message`).
//
// Reads reassemble frames on the delimiter through a `BufRead`, so a frame
// split across several TCP reads, or several frames arriving in one read,
// are both handled. A `\r\n` terminator is accepted, blank lines are
// skipped, and a final frame without a terminator is still delivered when
// the peer closes the stream.
//
// `MAX_MESSAGE_SIZE` bounds how much a single frame may buffer.

use std::io::{self, BufRead, Read, Write};

/// Maximum allowed frame payload (64 KiB). Real frames are a few dozen bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Write one frame: payload, then `\n`, then flush.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = msg.len();
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    if msg.contains(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "message contains a frame delimiter",
        ));
    }
    writer.write_all(msg)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read one frame, without its terminator.
///
/// Returns `UnexpectedEof` if the stream closes before any frame byte
/// arrives. Returns `InvalidData` if a frame exceeds `MAX_MESSAGE_SIZE`.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Vec<u8>> {
    loop {
        let mut buf = Vec::new();
        // Room for a full-size frame plus a CRLF terminator.
        let limit = MAX_MESSAGE_SIZE as u64 + 2;
        let n = Read::take(&mut *reader, limit).read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            ));
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message too large: more than {MAX_MESSAGE_SIZE} bytes"),
            ));
        }

        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return Ok(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_appends_single_newline() {
        let mut buf = Vec::new();
        write_message(&mut buf, br#"{"key":"up"}"#).unwrap();
        assert_eq!(buf, b"{\"key\":\"up\"}\n");
    }

    #[test]
    fn pipelined_frames_are_split() {
        let mut cursor = Cursor::new(b"{\"a\":1}\n{\"b\":2}\n".to_vec());
        assert_eq!(read_message(&mut cursor).unwrap(), b"{\"a\":1}");
        assert_eq!(read_message(&mut cursor).unwrap(), b"{\"b\":2}");
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn crlf_and_blank_lines_are_tolerated() {
        let mut cursor = Cursor::new(b"\n\r\n{\"a\":1}\r\n".to_vec());
        assert_eq!(read_message(&mut cursor).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn unterminated_final_frame_is_delivered() {
        let mut cursor = Cursor::new(b"{\"name\":\"alice\"}".to_vec());
        assert_eq!(read_message(&mut cursor).unwrap(), b"{\"name\":\"alice\"}");
        assert!(read_message(&mut cursor).is_err());
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![b'x'; MAX_MESSAGE_SIZE + 1];
        let mut buf = Vec::new();
        let err = write_message(&mut buf, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_embedded_delimiter() {
        let mut buf = Vec::new();
        let err = write_message(&mut buf, b"a\nb").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_read() {
        let mut data = vec![b'x'; MAX_MESSAGE_SIZE + 10];
        data.push(b'\n');
        let mut cursor = Cursor::new(data);
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn frame_at_size_limit_is_accepted() {
        let mut data = vec![b'x'; MAX_MESSAGE_SIZE];
        data.push(b'\n');
        let mut cursor = Cursor::new(data);
        assert_eq!(read_message(&mut cursor).unwrap().len(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn frame_at_size_limit_with_crlf_is_accepted() {
        let mut data = vec![b'x'; MAX_MESSAGE_SIZE];
        data.extend_from_slice(b"\r\nnext\n");
        let mut cursor = Cursor::new(data);
        assert_eq!(read_message(&mut cursor).unwrap().len(), MAX_MESSAGE_SIZE);
        assert_eq!(read_message(&mut cursor).unwrap(), b"next");
    }

    #[test]
    fn terminated_frame_one_past_limit_is_rejected() {
        let mut data = vec![b'x'; MAX_MESSAGE_SIZE + 1];
        data.push(b'\n');
        let mut cursor = Cursor::new(data);
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
