//! Line diff for stores that do not shell out to git
//!
//! Produces a single-hunk unified patch: the common head and tail are trimmed,
//! the changed middle is aligned by longest common subsequence.

const CONTEXT: usize = 3;
/// Above this many cells the middle is emitted as a plain replace.
const LCS_CELL_LIMIT: usize = 4_000_000;

enum Op<'a> {
    Keep(&'a str),
    Del(&'a str),
    Add(&'a str),
}

/// Unified patch turning `old` into `new`. Empty if they are equal.
pub fn line_diff(path: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    let head = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let max_tail = a.len().min(b.len()) - head;
    let tail = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take(max_tail)
        .take_while(|(x, y)| x == y)
        .count();

    let mid_a = &a[head..a.len() - tail];
    let mid_b = &b[head..b.len() - tail];
    let before = head.min(CONTEXT);
    let after = tail.min(CONTEXT);

    let mut ops: Vec<Op> = a[head - before..head].iter().map(|l| Op::Keep(l)).collect();
    ops.extend(align(mid_a, mid_b));
    ops.extend(a[a.len() - tail..a.len() - tail + after].iter().map(|l| Op::Keep(l)));

    let old_len = before + mid_a.len() + after;
    let new_len = before + mid_b.len() + after;
    let mut out = format!("--- a/{}\n+++ b/{}\n", path, path);
    out.push_str(&format!(
        "@@ -{} +{} @@\n",
        range(head - before, old_len),
        range(head - before, new_len)
    ));
    for op in ops {
        let (sign, line) = match op {
            Op::Keep(l) => (' ', l),
            Op::Del(l) => ('-', l),
            Op::Add(l) => ('+', l),
        };
        out.push(sign);
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, len),
    }
}

fn align<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<Op<'a>> {
    if a.len().saturating_mul(b.len()) > LCS_CELL_LIMIT {
        let mut ops: Vec<Op> = a.iter().map(|l| Op::Del(l)).collect();
        ops.extend(b.iter().map(|l| Op::Add(l)));
        return ops;
    }

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let w = b.len() + 1;
    let mut lcs = vec![0u32; (a.len() + 1) * w];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i * w + j] = if a[i] == b[j] {
                lcs[(i + 1) * w + j + 1] + 1
            } else {
                lcs[(i + 1) * w + j].max(lcs[i * w + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    let mut ops = Vec::with_capacity(a.len() + b.len());
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            ops.push(Op::Keep(a[i]));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * w + j] >= lcs[i * w + j + 1] {
            ops.push(Op::Del(a[i]));
            i += 1;
        } else {
            ops.push(Op::Add(b[j]));
            j += 1;
        }
    }
    ops.extend(a[i..].iter().map(|l| Op::Del(l)));
    ops.extend(b[j..].iter().map(|l| Op::Add(l)));
    ops
}
