use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const DEFAULT_LOG_LIMIT: usize = 20;

/// The last `limit` lines of the log file, oldest first. A missing log file
/// reads as empty. Bytes that are not UTF-8 are replaced, since the log holds
/// raw process output.
pub fn read_last_lines(path: &Path, limit: usize) -> std::io::Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut reader = BufReader::new(file);
    let mut tail = VecDeque::with_capacity(limit);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if tail.len() == limit {
            tail.pop_front();
        }
        tail.push_back(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(tail.into())
}
