//! Turns one textual command line into a [`Request`].
//!
//! The first whitespace-delimited token is the action word (case-insensitive);
//! everything after it becomes string arguments. Arguments come in two
//! lexical forms: bare words, and double-quoted strings in which `\"` escapes
//! a literal quote (any other backslash is kept as-is). Runs of whitespace
//! between tokens collapse, and trailing whitespace is ignored.

use crate::protocol::{Action, Request};

/// parses a command line; never fails: unknown actions become
/// [`Action::UnknownCommand`] and surface as an error reply at execution
pub fn parse_command(line: &str) -> Request {
    let mut chars = line.chars().peekable();

    skip_spaces(&mut chars);
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            break;
        }
        word.push(c);
        chars.next();
    }
    if word.is_empty() {
        return Request::new(Action::UnknownCommand);
    }

    let mut request = Request::new(Action::from_word(&word));

    loop {
        skip_spaces(&mut chars);
        match chars.peek() {
            None => break,
            Some('"') => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') if chars.peek() == Some(&'"') => {
                            value.push('"');
                            chars.next();
                        }
                        Some('"') | None => break,
                        Some(c) => value.push(c),
                    }
                }
                request = request.with_str(value);
            }
            Some(_) => {
                let mut value = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                request = request.with_str(value);
            }
        }
    }

    request
}

fn skip_spaces(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}
