//! Line splitting for merged child output.

use std::io::{self, BufRead};

/// Read `reader` to the end, handing each line to `emit`
///
/// Lines end at `\n`, `\r`, or `\r\n`, so carriage-return progress updates
/// arrive as separate lines as soon as they are written. A trailing partial
/// line is emitted at end of stream. Stops early when `emit` returns `false`.
pub(crate) fn split_lines<R: BufRead>(
    mut reader: R,
    mut emit: impl FnMut(String) -> bool,
) -> io::Result<()> {
    let mut line = Vec::new();
    let mut after_cr = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        if available.is_empty() {
            if !line.is_empty() {
                emit(decode(&mut line));
            }
            return Ok(());
        }

        let len = available.len();
        for &byte in available {
            match byte {
                b'\n' if after_cr => after_cr = false,
                b'\n' | b'\r' => {
                    after_cr = byte == b'\r';
                    if !emit(decode(&mut line)) {
                        return Ok(());
                    }
                }
                _ => {
                    after_cr = false;
                    line.push(byte);
                }
            }
        }
        reader.consume(len);
    }
}

fn decode(line: &mut Vec<u8>) -> String {
    let text = String::from_utf8_lossy(line).into_owned();
    line.clear();
    text
}
