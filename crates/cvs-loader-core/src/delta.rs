//! RCS edit-script application.
//!
//! A script is a sequence of commands, one per line:
//!
//! - `dN M`: delete `M` lines starting at source line `N` (1-based);
//! - `aN M`: insert the next `M` script lines after source line `N`.
//!
//! Commands refer to line numbers of the *source* text and must appear in
//! ascending order.

use crate::errors::DeltaError;

/// Split into lines, keeping each terminating `\n`. A final line without a
/// newline is kept as is.
pub fn split_lines(text: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, b) in text.iter().enumerate() {
        if *b == b'\n' {
            lines.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn parse_command(line: &[u8], lineno: usize) -> Result<(u8, usize, usize), DeltaError> {
    let bad = |reason: &str| DeltaError::BadCommand {
        line: lineno,
        reason: reason.to_string(),
    };
    let text = std::str::from_utf8(line).map_err(|_| bad("not ascii"))?.trim_end();
    let mut chars = text.chars();
    let op = match chars.next() {
        Some('a') => b'a',
        Some('d') => b'd',
        _ => return Err(bad("expected 'a' or 'd'")),
    };
    let mut fields = chars.as_str().split_whitespace();
    let start = fields
        .next()
        .and_then(|f| f.parse::<usize>().ok())
        .ok_or_else(|| bad("missing line number"))?;
    let count = fields
        .next()
        .and_then(|f| f.parse::<usize>().ok())
        .ok_or_else(|| bad("missing line count"))?;
    Ok((op, start, count))
}

/// Apply `script` to `source`, producing the neighbouring revision's text.
pub fn apply_rcs_diff(source: &[u8], script: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let src = split_lines(source);
    let cmds = split_lines(script);
    let mut out: Vec<u8> = Vec::with_capacity(source.len() + script.len());
    let mut cur = 0usize;
    let mut i = 0usize;

    while i < cmds.len() {
        let lineno = i + 1;
        let (op, start, count) = parse_command(cmds[i], lineno)?;
        i += 1;
        match op {
            b'd' => {
                if start == 0 || start - 1 < cur || start - 1 + count > src.len() {
                    return Err(DeltaError::OutOfRange { line: lineno });
                }
                for line in &src[cur..start - 1] {
                    out.extend_from_slice(line);
                }
                cur = start - 1 + count;
            }
            _ => {
                if start < cur || start > src.len() {
                    return Err(DeltaError::OutOfRange { line: lineno });
                }
                for line in &src[cur..start] {
                    out.extend_from_slice(line);
                }
                cur = start;
                if i + count > cmds.len() {
                    return Err(DeltaError::BadCommand {
                        line: lineno,
                        reason: format!("append of {} lines runs past end of script", count),
                    });
                }
                for line in &cmds[i..i + count] {
                    out.extend_from_slice(line);
                }
                i += count;
            }
        }
    }
    for line in &src[cur..] {
        out.extend_from_slice(line);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines_keeps_newlines() {
        assert_eq!(split_lines(b"a\nb\nc"), vec![&b"a\n"[..], b"b\n", b"c"]);
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn test_delete_and_append() {
        let src = b"one\ntwo\nthree\nfour\n";
        let script = b"d2 1\na3 2\nthree-and-a-half\nalmost four\n";
        let out = apply_rcs_diff(src, script).unwrap();
        assert_eq!(out, b"one\nthree\nthree-and-a-half\nalmost four\nfour\n");
    }

    #[test]
    fn test_replace_line_in_place() {
        let out = apply_rcs_diff(b"a\nb\nc\n", b"d2 1\na2 1\nB\n").unwrap();
        assert_eq!(out, b"a\nB\nc\n");
    }

    #[test]
    fn test_append_at_top_and_empty_script() {
        assert_eq!(apply_rcs_diff(b"x\n", b"a0 1\nfirst\n").unwrap(), b"first\nx\n");
        assert_eq!(apply_rcs_diff(b"x\n", b"").unwrap(), b"x\n");
    }

    #[test]
    fn test_last_line_without_newline() {
        let out = apply_rcs_diff(b"a\nb", b"d2 1\na2 1\nc").unwrap();
        assert_eq!(out, b"a\nc");
    }

    #[test]
    fn test_rejects_out_of_order_and_out_of_range() {
        assert!(matches!(
            apply_rcs_diff(b"a\nb\nc\n", b"d3 1\nd1 1\n"),
            Err(DeltaError::OutOfRange { line: 2 })
        ));
        assert!(matches!(
            apply_rcs_diff(b"a\n", b"d1 5\n"),
            Err(DeltaError::OutOfRange { line: 1 })
        ));
        assert!(matches!(
            apply_rcs_diff(b"a\n", b"x1 1\n"),
            Err(DeltaError::BadCommand { .. })
        ));
        assert!(matches!(
            apply_rcs_diff(b"a\n", b"a1 3\nonly one\n"),
            Err(DeltaError::BadCommand { .. })
        ));
    }
}
