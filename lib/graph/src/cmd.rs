//! Command-string helpers: tokenization and port substitution.
//!
//! A node's `cmd` is a single string in the graph file. The launcher splits it
//! into argv tokens before exec, and rewrites named ports inside those tokens
//! into `/proc` fd paths. Both operations live here so the validator and the
//! launcher agree on them exactly.

use crate::errors::{ReplaceError, TokenizeError};

/// Split a command string into argv tokens.
///
/// Tokens are separated by runs of whitespace. A matched pair of single or
/// double quotes groups everything between them into the current token; the
/// quotes themselves are stripped. An unterminated quote block is an error.
pub fn tokenize(command: &str) -> Result<Vec<String>, TokenizeError> {
	let mut tokens: Vec<String> = Vec::new();
	let mut current = String::new();
	let mut in_token = false;
	let mut quote: Option<char> = None;

	for c in command.chars() {
		match quote {
			Some(q) => {
				if c == q {
					quote = None;
				} else {
					current.push(c);
				}
			}

			None => {
				if c == '\'' || c == '"' {
					quote = Some(c);
					in_token = true;
				} else if c.is_whitespace() {
					if in_token {
						tokens.push(std::mem::take(&mut current));
						in_token = false;
					}
				} else {
					current.push(c);
					in_token = true;
				}
			}
		}
	}

	if quote.is_some() {
		return Err(TokenizeError::UnbalancedQuote);
	}

	if in_token {
		tokens.push(current);
	}

	return Ok(tokens);
}

/// Replace every non-overlapping occurrence of `pattern` in `original`
/// with `with`, scanning left to right.
pub fn replace_all(original: &str, pattern: &str, with: &str) -> Result<String, ReplaceError> {
	if pattern.is_empty() {
		return Err(ReplaceError::EmptyPattern);
	}

	let mut out = String::with_capacity(original.len());
	let mut rest = original;
	while let Some(at) = rest.find(pattern) {
		out.push_str(&rest[..at]);
		out.push_str(with);
		rest = &rest[at + pattern.len()..];
	}
	out.push_str(rest);

	return Ok(out);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tokenize_plain() {
		let t = tokenize("cat /tmp/in").unwrap();
		assert_eq!(t, vec!["cat", "/tmp/in"]);
	}

	#[test]
	fn tokenize_quotes_preserve_spaces() {
		let t = tokenize(r#"a "b c" d"#).unwrap();
		assert_eq!(t, vec!["a", "b c", "d"]);

		let t = tokenize("sh -c 'cat > out'").unwrap();
		assert_eq!(t, vec!["sh", "-c", "cat > out"]);
	}

	#[test]
	fn tokenize_adjacent_quotes_join() {
		let t = tokenize(r#"a"b c"d"#).unwrap();
		assert_eq!(t, vec!["ab cd"]);
	}

	#[test]
	fn tokenize_empty() {
		assert_eq!(tokenize("").unwrap(), Vec::<String>::new());
		assert_eq!(tokenize("   \t ").unwrap(), Vec::<String>::new());
	}

	#[test]
	fn tokenize_unbalanced() {
		assert!(matches!(
			tokenize(r#"a "b c"#),
			Err(TokenizeError::UnbalancedQuote)
		));
		assert!(matches!(
			tokenize("echo 'oops"),
			Err(TokenizeError::UnbalancedQuote)
		));
	}

	#[test]
	fn replace_all_basic() {
		assert_eq!(replace_all("a_P_b_P_c", "_P_", "X").unwrap(), "aXbXc");
	}

	#[test]
	fn replace_all_left_to_right_non_overlapping() {
		assert_eq!(replace_all("aaa", "aa", "b").unwrap(), "ba");
	}

	#[test]
	fn replace_all_identity_when_pattern_equals_replacement() {
		let s = "x _P_ y _P_";
		assert_eq!(replace_all(s, "_P_", "_P_").unwrap(), s);
	}

	#[test]
	fn replace_all_empty_pattern_is_error() {
		assert!(matches!(
			replace_all("abc", "", "x"),
			Err(ReplaceError::EmptyPattern)
		));
	}
}
