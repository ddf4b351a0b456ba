//! Endpoint path patterns.
//!
//! A pattern is compiled once into tokens:
//!
//! - `:name` matches one non-empty path segment (no `/`),
//! - a trailing `*` matches any remainder, including further segments,
//! - everything else matches literally.

use std::fmt;

use crate::error::{BucketgateError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param,
    Rest,
}

/// A precompiled path pattern such as `/buckets/:bucketId/files/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPattern {
    source: String,
    tokens: Vec<Token>,
}

impl EndpointPattern {
    /// Compile a pattern.
    pub fn compile(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(invalid(pattern, "must start with `/`"));
        }

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            match ch {
                ':' => {
                    let mut name_len = 0;
                    while let Some((_, c)) = chars.peek() {
                        if c.is_ascii_alphanumeric() || *c == '_' {
                            name_len += 1;
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name_len == 0 {
                        return Err(invalid(pattern, "parameter is missing a name"));
                    }
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Param);
                }
                '*' => {
                    if idx + 1 != pattern.len() {
                        return Err(invalid(pattern, "`*` is only allowed at the end"));
                    }
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Rest);
                }
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// Whether the pattern has no parameters or wildcard.
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `path` matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        if self.is_literal() {
            return self.source == path;
        }
        match_tokens(&self.tokens, path)
    }
}

impl fmt::Display for EndpointPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid(pattern: &str, reason: &str) -> BucketgateError {
    BucketgateError::Config(format!("invalid endpoint pattern `{}`: {}", pattern, reason))
}

fn match_tokens(tokens: &[Token], path: &str) -> bool {
    match tokens.split_first() {
        None => path.is_empty(),
        Some((Token::Rest, _)) => true,
        Some((Token::Literal(lit), rest)) => path
            .strip_prefix(lit.as_str())
            .is_some_and(|remainder| match_tokens(rest, remainder)),
        Some((Token::Param, rest)) => {
            let segment_end = path.find('/').unwrap_or(path.len());
            // Longest parameter first; backtrack for patterns like `:name.json`.
            let mut ends: Vec<usize> = path[..segment_end]
                .char_indices()
                .map(|(i, _)| i)
                .skip(1)
                .collect();
            if segment_end > 0 {
                ends.push(segment_end);
            }
            ends.into_iter()
                .rev()
                .any(|end| match_tokens(rest, &path[end..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> EndpointPattern {
        EndpointPattern::compile(p).unwrap()
    }

    #[test]
    fn test_literal_pattern() {
        let p = pattern("/auth/login");
        assert!(p.is_literal());
        assert!(p.matches("/auth/login"));
        assert!(!p.matches("/auth/login/extra"));
        assert!(!p.matches("/auth"));
    }

    #[test]
    fn test_param_matches_one_segment() {
        let p = pattern("/files/:fileId/download");
        assert!(!p.is_literal());
        assert!(p.matches("/files/abc-123/download"));
        assert!(!p.matches("/files//download"));
        assert!(!p.matches("/files/a/b/download"));
        assert!(!p.matches("/files/abc/download/now"));
    }

    #[test]
    fn test_trailing_wildcard_matches_remainder() {
        let p = pattern("/transforms/*");
        assert!(p.matches("/transforms/"));
        assert!(p.matches("/transforms/resize"));
        assert!(p.matches("/transforms/jobs/42/retry"));
        assert!(!p.matches("/transforms"));
        assert!(!p.matches("/transformsx"));
    }

    #[test]
    fn test_wildcard_suffix_inside_segment() {
        let p = pattern("/buckets/:bucketId/files/upload*");
        assert!(p.matches("/buckets/b1/files/upload"));
        assert!(p.matches("/buckets/b1/files/upload-multipart"));
        assert!(p.matches("/buckets/b1/files/upload/parts/3"));
        assert!(!p.matches("/buckets/b1/files/download"));
    }

    #[test]
    fn test_param_with_literal_suffix() {
        let p = pattern("/exports/:name.json");
        assert!(p.matches("/exports/report.json"));
        assert!(p.matches("/exports/a.b.json"));
        assert!(!p.matches("/exports/.json"));
        assert!(!p.matches("/exports/report.csv"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(EndpointPattern::compile("auth/login").is_err());
        assert!(EndpointPattern::compile("/files/:/download").is_err());
        assert!(EndpointPattern::compile("/files/*/download").is_err());
    }
}
