use std::fmt::Write as _;

use regex::Regex;

use crate::error::TemplateError;

const ESCAPE: char = '#';
const OPEN: char = '{';
const CLOSE: char = '}';
const IN_OUT_SEPARATOR: char = '/';

/// Reserved body of the first marker in [`ArgMode::RefCursor`] templates.
pub const REFCURSOR: &str = "refcursor";

/// How the body of a `#{...}` marker is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgMode {
    /// Body is a type name; values come from a flat list.
    Basic,
    /// Body is a getter name invoked on a bean.
    Bean,
    /// Body is `getter`, `getter/setter` or `/setter` for procedure calls.
    InOut,
    /// Like [`ArgMode::Basic`], but the first body must be `refcursor`.
    RefCursor,
}

/// One bound argument, in the order its marker appeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDescriptor {
    /// 1-based statement parameter number
    pub index: usize,
    pub getter: Option<String>,
    pub setter: Option<String>,
    pub type_name: Option<String>,
}

impl ArgDescriptor {
    pub fn is_input(&self) -> bool {
        self.getter.is_some()
    }

    pub fn is_output(&self) -> bool {
        self.setter.is_some()
    }
}

/// A template rewritten to positional `$n` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    pub sql: String,
    pub args: Vec<ArgDescriptor>,
    pub mode: ArgMode,
}

/// Rewrites `#{...}` markers into `$1`, `$2`, ... and collects their descriptors.
///
/// A `#` not followed by `{` is copied through unchanged, so operators such as
/// `#>>` survive.
///
/// # Examples
///
/// ```
/// use sqlx_template_bind::template::{ArgMode, Scanner};
///
/// let scanner = Scanner::new()?;
/// let parsed = scanner.scan(
///     "SELECT * FROM users WHERE id = #{int32} AND name = #{string}",
///     ArgMode::Basic,
/// )?;
/// assert_eq!(parsed.sql, "SELECT * FROM users WHERE id = $1 AND name = $2");
/// assert_eq!(parsed.args[1].type_name.as_deref(), Some("string"));
/// # Ok::<(), sqlx_template_bind::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Scanner {
    identifier: Regex,
}

impl Scanner {
    pub fn new() -> crate::Result<Self> {
        let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:<>]*$")?;
        Ok(Self { identifier })
    }

    pub fn scan(&self, template: &str, mode: ArgMode) -> crate::Result<ParsedTemplate> {
        let mut sql = String::with_capacity(template.len());
        let mut args = Vec::new();
        let mut chars = template.char_indices().peekable();

        while let Some((position, ch)) = chars.next() {
            if ch != ESCAPE || chars.peek().map(|&(_, c)| c) != Some(OPEN) {
                sql.push(ch);
                continue;
            }
            chars.next();

            let mut body = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == CLOSE {
                    closed = true;
                    break;
                }
                body.push(c);
            }
            if !closed {
                return Err(TemplateError::Unterminated { position }.into());
            }

            let index = args.len() + 1;
            args.push(self.descriptor(mode, index, position, &body)?);
            let _ = write!(sql, "${index}");
        }

        if mode == ArgMode::RefCursor {
            let first = args.first().and_then(|a| a.type_name.as_deref());
            if first != Some(REFCURSOR) {
                return Err(TemplateError::MissingRefCursor {
                    found: first.map(str::to_owned),
                }
                .into());
            }
        }

        tracing::debug!(?mode, args = args.len(), %sql, "rewrote SQL template");
        Ok(ParsedTemplate { sql, args, mode })
    }

    fn descriptor(
        &self,
        mode: ArgMode,
        index: usize,
        position: usize,
        body: &str,
    ) -> Result<ArgDescriptor, TemplateError> {
        let mut arg = ArgDescriptor {
            index,
            getter: None,
            setter: None,
            type_name: None,
        };
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(TemplateError::EmptyMarker { position });
        }

        match mode {
            ArgMode::Basic | ArgMode::RefCursor => {
                arg.type_name = Some(self.name(trimmed, position, body)?);
            }
            ArgMode::Bean => {
                arg.getter = Some(self.name(trimmed, position, body)?);
            }
            ArgMode::InOut => {
                let mut parts = trimmed.split(IN_OUT_SEPARATOR);
                let getter = parts.next().unwrap_or_default().trim();
                let setter = parts.next().unwrap_or_default().trim();
                if parts.next().is_some() || (getter.is_empty() && setter.is_empty()) {
                    return Err(malformed(position, body));
                }
                if !getter.is_empty() {
                    arg.getter = Some(self.name(getter, position, body)?);
                }
                if !setter.is_empty() {
                    arg.setter = Some(self.name(setter, position, body)?);
                }
            }
        }
        Ok(arg)
    }

    fn name(&self, name: &str, position: usize, body: &str) -> Result<String, TemplateError> {
        if self.identifier.is_match(name) {
            Ok(name.to_owned())
        } else {
            Err(malformed(position, body))
        }
    }
}

fn malformed(position: usize, body: &str) -> TemplateError {
    TemplateError::Malformed {
        position,
        body: body.to_owned(),
    }
}

/// Scans `template` with a freshly built [`Scanner`].
pub fn parse_template(template: &str, mode: ArgMode) -> crate::Result<ParsedTemplate> {
    Scanner::new()?.scan(template, mode)
}
