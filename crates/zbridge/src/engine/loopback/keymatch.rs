// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key expression intersection (`*`, `**`, `$*`).

/// Generic glob intersection: can some concrete sequence match both `p` and `q`?
///
/// `is_star` elements match any run (possibly empty) of elements; other
/// elements must pairwise satisfy `matches`.
fn glob_intersect<T>(
    p: &[T],
    q: &[T],
    is_star: impl Fn(&T) -> bool,
    matches: impl Fn(&T, &T) -> bool,
) -> bool {
    let (n, m) = (p.len(), q.len());
    // dp[i][j]: p[i..] and q[j..] intersect.
    let mut dp = vec![vec![false; m + 1]; n + 1];
    dp[n][m] = true;
    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }
            dp[i][j] = if i < n && is_star(&p[i]) {
                dp[i + 1][j] || (j < m && dp[i][j + 1])
            } else if j < m && is_star(&q[j]) {
                dp[i][j + 1] || (i < n && dp[i + 1][j])
            } else if i < n && j < m {
                matches(&p[i], &q[j]) && dp[i + 1][j + 1]
            } else {
                false
            };
        }
    }
    dp[0][0]
}

#[derive(PartialEq)]
enum Tok {
    Star,
    Char(char),
}

fn tokenize(chunk: &str) -> Vec<Tok> {
    let mut toks = Vec::with_capacity(chunk.len());
    let mut chars = chunk.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'*') {
            chars.next();
            toks.push(Tok::Star);
        } else {
            toks.push(Tok::Char(c));
        }
    }
    toks
}

fn chunk_intersects(a: &str, b: &str) -> bool {
    if a == "*" || b == "*" {
        return true;
    }
    if !a.contains("$*") && !b.contains("$*") {
        return a == b;
    }
    glob_intersect(
        &tokenize(a),
        &tokenize(b),
        |t| *t == Tok::Star,
        |x, y| x == y,
    )
}

/// Whether two key expressions share at least one concrete key.
pub(crate) fn intersects(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.split('/').collect();
    let b: Vec<&str> = b.split('/').collect();
    glob_intersect(&a, &b, |c| *c == "**", |x, y| chunk_intersects(x, y))
}
