//! Splits a component's `field_name` into `(keyword, statement)`, or marks
//! it as a bare field reference.

use crate::error::{MextError, SourceLocation};

pub const KEYWORDS: &[&str] = &[
    "option",
    "set",
    "default",
    "count",
    "include",
    "input",
    "import",
    "if",
    "else",
    "elif",
    "endif",
    "for",
    "endfor",
    "trim_newline",
    "format",
    "comment",
    "endcomment",
];

pub const INC_LEVEL: &[&str] = &["if", "for"];
pub const DESC_LEVEL: &[&str] = &["endif", "endfor"];

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub keyword: Option<String>,
    pub statement: Option<String>,
}

/// Classifies one component's `field_name`. `field_name` is `None` for a
/// component with no placeholder at all (the classifier is never invoked in
/// that case by the interpreter, but is total for convenience).
pub fn classify(field_name: Option<&str>, loc: &SourceLocation) -> Result<Classified, MextError> {
    let Some(field_name) = field_name else {
        return Ok(Classified {
            keyword: None,
            statement: None,
        });
    };

    if let Some(rest) = field_name.strip_prefix('@') {
        let (keyword, statement) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(rest[idx + 1..].trim().to_string())),
            None => (rest, None),
        };
        if !KEYWORDS.contains(&keyword) {
            return Err(MextError::syntax(
                format!("\"{keyword}\" is not a valid keyword."),
                loc.clone(),
            ));
        }
        Ok(Classified {
            keyword: Some(keyword.to_string()),
            statement,
        })
    } else {
        Ok(Classified {
            keyword: None,
            statement: Some(field_name.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    #[test]
    fn field_reference_has_no_keyword() {
        let c = classify(Some("user.name"), &loc()).unwrap();
        assert_eq!(c.keyword, None);
        assert_eq!(c.statement.as_deref(), Some("user.name"));
    }

    #[test]
    fn directive_without_statement() {
        let c = classify(Some("@endif"), &loc()).unwrap();
        assert_eq!(c.keyword.as_deref(), Some("endif"));
        assert_eq!(c.statement, None);
    }

    #[test]
    fn directive_with_statement_is_trimmed() {
        let c = classify(Some("@set  a   b "), &loc()).unwrap();
        assert_eq!(c.keyword.as_deref(), Some("set"));
        assert_eq!(c.statement.as_deref(), Some("a   b"));
    }

    #[test]
    fn unknown_keyword_is_syntax_error() {
        assert!(classify(Some("@bogus"), &loc()).is_err());
    }
}
