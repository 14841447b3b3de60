//! Cheap source checks that run before the parser.
//!
//! These reject input that is obviously unusable (empty, oversized, or
//! nested deeply enough to strain the recursive-descent parser) with a
//! precise error, before any tokenizing happens.

use crate::error::SafeError;

/// Maximum source size in bytes (64 KB).
pub const DEFAULT_MAX_CODE_SIZE: usize = 64 * 1024;

/// Maximum bracket nesting accepted before parsing.
pub const DEFAULT_MAX_NESTING: usize = 48;

/// Validate script source before it is parsed.
pub fn validate_code(
    code: &str,
    max_size: Option<usize>,
    max_nesting: Option<usize>,
) -> Result<(), SafeError> {
    let max = max_size.unwrap_or(DEFAULT_MAX_CODE_SIZE);

    if code.len() > max {
        return Err(SafeError::CodeTooLarge {
            max,
            actual: code.len(),
        });
    }

    if code.trim().is_empty() {
        return Err(SafeError::EmptyCode);
    }

    let max_nesting = max_nesting.unwrap_or(DEFAULT_MAX_NESTING);
    let depth = bracket_depth(code);
    if depth > max_nesting {
        return Err(SafeError::NestingTooDeep {
            max: max_nesting,
            actual: depth,
        });
    }

    Ok(())
}

/// Deepest bracket nesting outside string literals and comments.
fn bracket_depth(code: &str) -> usize {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    let mut deepest = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            quote @ (b'\'' | b'"') => {
                let triple = bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote);
                i += if triple { 3 } else { 1 };
                while i < bytes.len() {
                    match bytes[i] {
                        b'\\' => i += 1,
                        b'\n' if !triple => break,
                        c if c == quote => {
                            if !triple {
                                break;
                            }
                            if bytes.get(i + 1) == Some(&quote)
                                && bytes.get(i + 2) == Some(&quote)
                            {
                                i += 2;
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    deepest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_script() {
        let code = "x = [1, (2, {'a': 3})]\nprint x\n";
        assert!(validate_code(code, None, None).is_ok());
    }

    #[test]
    fn rejects_empty_code() {
        assert!(matches!(validate_code("", None, None), Err(SafeError::EmptyCode)));
        assert!(matches!(validate_code("  \n\t", None, None), Err(SafeError::EmptyCode)));
    }

    #[test]
    fn rejects_oversized_code() {
        let big = "x = 1\n".repeat(20_000);
        let err = validate_code(&big, None, None).unwrap_err();
        assert!(matches!(err, SafeError::CodeTooLarge { max: DEFAULT_MAX_CODE_SIZE, .. }));
    }

    #[test]
    fn custom_size_limit() {
        assert!(validate_code("x = 1", Some(3), None).is_err());
        assert!(validate_code("x = 1", Some(5), None).is_ok());
    }

    #[test]
    fn rejects_deep_brackets() {
        let code = format!("x = {}1{}", "[".repeat(60), "]".repeat(60));
        let err = validate_code(&code, None, None).unwrap_err();
        assert!(matches!(err, SafeError::NestingTooDeep { actual: 60, .. }));
    }

    #[test]
    fn brackets_in_strings_and_comments_do_not_count() {
        let code = format!(
            "x = '{}'\ny = \"\"\"{}\n\"\"\"\n# {}\n",
            "(".repeat(100),
            "[".repeat(100),
            "{".repeat(100)
        );
        assert!(validate_code(&code, None, None).is_ok());
        assert_eq!(bracket_depth("f('(', \"[\")"), 1);
    }

    #[test]
    fn escaped_quotes_stay_inside_strings() {
        assert_eq!(bracket_depth(r"s = 'it\'s (' + (a)"), 1);
    }
}
