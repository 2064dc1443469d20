//! Variable expansion over a raw input line, performed before tokenization.

use crate::env::Environment;

/// Characters that terminate a variable name once a reference is open.
fn ends_name(ch: char) -> bool {
    matches!(ch, ' ' | '$' | '/' | '>' | '<')
}

/// Rewrite `line`, substituting every `$name` reference with its value from
/// `env` (the empty string when undefined).
///
/// A reference opens at a `$` followed by any character other than a space;
/// the name is the maximal run of characters up to a space, `$`, `/`, `>`,
/// `<`, or the end of the line. The delimiter itself is copied through
/// verbatim, except that a `$` delimiter immediately opens the next
/// reference, so `$A$B` expands both. A reference still open at the end of
/// the line is resolved as well.
pub fn expand(line: &str, env: &Environment) -> String {
    let input: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut pos = 0;

    while pos < input.len() {
        let ch = input[pos];
        let opens_reference =
            ch == '$' && matches!(input.get(pos + 1), Some(&next) if next != ' ');
        if !opens_reference {
            out.push(ch);
            pos += 1;
            continue;
        }

        // Collect the name, then substitute.
        pos += 1;
        let mut name = String::new();
        while pos < input.len() && !ends_name(input[pos]) {
            name.push(input[pos]);
            pos += 1;
        }
        out.push_str(env.get(&name).unwrap_or(""));

        match input.get(pos) {
            // A `$` delimiter re-enters reference recognition on the next pass.
            Some('$') => {}
            Some(&delim) => {
                out.push(delim);
                pos += 1;
            }
            None => {}
        }
    }

    out
}
