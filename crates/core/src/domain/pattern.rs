// Shell-glob and regex helpers shared by gear input schemas and rule matchers

use regex::{Regex, RegexBuilder};

/// Compile a shell glob (`*`, `?`, `[...]`) into an anchored, case-insensitive regex
pub fn compile_glob(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');

    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '[' => {
                // Character class; `[!...]` negates like fnmatch
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' {
                        class.push_str("\\\\");
                    } else {
                        class.push(inner);
                    }
                }
                if closed {
                    class.push(']');
                    pattern.push_str(&class);
                } else {
                    // Unterminated class matches a literal '['
                    pattern.push_str(&regex::escape("["));
                    pattern.push_str(&regex::escape(&class[1..]));
                }
            }
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }

    pattern.push('$');
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}

/// Glob match; an invalid glob never matches
pub fn glob_matches(glob: &str, value: &str) -> bool {
    compile_glob(glob).map(|re| re.is_match(value)).unwrap_or(false)
}

/// Compile a user regex anchored at the start of the value, case-insensitive
pub fn compile_prefix_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{})", pattern))
        .case_insensitive(true)
        .build()
}
