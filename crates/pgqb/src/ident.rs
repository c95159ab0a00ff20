//! SQL identifier parsing and quoting.
//!
//! Every identifier pgqb emits is double-quoted. Input may use dotted notation
//! (`profile.userId`) and already-quoted parts (`"Odd Name".id`):
//!
//! - Unquoted parts are validated against: `[A-Za-z_][A-Za-z0-9_$]*`
//! - Quoted parts allow any characters except NUL and escape `"` as `""`

use crate::error::{OrmError, OrmResult};

/// A SQL identifier (column, table, or schema name) split into its dotted parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub parts: Vec<String>,
}

impl Ident {
    /// Parse an identifier string, supporting dotted and quoted forms.
    pub fn parse(s: &str) -> OrmResult<Self> {
        if s.is_empty() {
            return Err(OrmError::build("identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(OrmError::build("identifier cannot contain NUL character"));
        }

        let mut parts = Vec::new();
        let mut chars = s.chars().peekable();

        while chars.peek().is_some() {
            if !parts.is_empty() {
                match chars.next() {
                    Some('.') if chars.peek().is_none() => {
                        return Err(OrmError::build(format!("trailing '.' in identifier {s:?}")));
                    }
                    Some('.') => {}
                    Some(c) => {
                        return Err(OrmError::build(format!(
                            "expected '.' between identifier parts of {s:?}, got '{c}'"
                        )));
                    }
                    None => break,
                }
            }

            if chars.peek() == Some(&'"') {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            name.push('"');
                        }
                        Some('"') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(OrmError::build(format!(
                                "unclosed quoted identifier {s:?}"
                            )));
                        }
                    }
                }
                if name.is_empty() {
                    return Err(OrmError::build("empty quoted identifier"));
                }
                parts.push(name);
                continue;
            }

            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == '.' {
                    break;
                }
                let valid = if name.is_empty() {
                    c == '_' || c.is_ascii_alphabetic()
                } else {
                    c == '_' || c == '$' || c.is_ascii_alphanumeric()
                };
                if !valid {
                    return Err(OrmError::build(format!(
                        "invalid character '{c}' in identifier {s:?}"
                    )));
                }
                name.push(c);
                chars.next();
            }
            if name.is_empty() {
                return Err(OrmError::build(format!("empty segment in identifier {s:?}")));
            }
            parts.push(name);
        }

        Ok(Self { parts })
    }

    /// Last part of the identifier (the bare table or column name).
    pub fn last(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or_default()
    }

    /// Render the identifier as SQL, quoting every part.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            push_quoted(&mut out, part);
        }
        out
    }
}

fn push_quoted(out: &mut String, name: &str) {
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}

/// Quote a single name without splitting on dots (aliases, savepoints).
pub fn quote(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    push_quoted(&mut out, name);
    out
}

/// Quote a possibly schema-qualified table name.
pub fn quote_table(name: &str) -> OrmResult<String> {
    Ok(Ident::parse(name)?.to_sql())
}

/// Quote a column reference, qualifying bare names with `scope`.
///
/// `*` becomes `"scope".*`, `a.b` becomes `"a"."b"`, `b` becomes `"scope"."b"`.
/// An empty scope leaves bare names unqualified.
pub fn quote_column(scope: &str, column: &str) -> OrmResult<String> {
    if column == "*" {
        return Ok(if scope.is_empty() {
            "*".to_string()
        } else {
            format!("{}.*", quote(scope))
        });
    }
    if let Some(table) = column.strip_suffix(".*") {
        return Ok(format!("{}.*", quote_table(table)?));
    }

    let ident = Ident::parse(column)?;
    if ident.parts.len() > 1 || scope.is_empty() {
        return Ok(ident.to_sql());
    }
    Ok(format!("{}.{}", quote(scope), ident.to_sql()))
}
