//! The `[%...%]` template micro-language
//!
//! A template is literal text with embedded placeholders. A placeholder
//! names a value provider (a context variable by default, or one of the
//! `!func` providers) and optionally prefixes it with a `(type params...)`
//! formatter. Templates parse once into a [`PreparedTemplate`] and
//! evaluate any number of times against a context.
//!
//! Evaluation concatenates the parts. A part that yields null makes the
//! whole result null; formatters prevent that for placeholders by turning
//! null into the literal `NULL` first, so templated SQL stays composable.
//!
//! ```
//! use dray::context::Context;
//! use dray::script::ScriptExpression;
//! use dray::{ExecContext, PreparedTemplate};
//!
//! let mut ctx = ExecContext::new("demo");
//! ctx.set_var("name", "O'Brien");
//! let t = PreparedTemplate::parse("update t set n = [%(string) name%]")?;
//! assert_eq!(
//!     t.calculate(&mut ctx)?.as_deref(),
//!     Some("update t set n = 'O''Brien'"),
//! );
//! # Ok::<(), dray::EngineError>(())
//! ```

mod format;
mod providers;
pub(crate) mod scan;

use crate::context::Context;
use crate::result::Result;
use crate::script::expr::Const;
use crate::script::{ScriptExpression, SharedExpr};
use crate::text::replace_bracket;
use format::{FormatKind, Formatted};
use scan::{err_at, Scanner};
use std::rc::Rc;

/// A parsed template, ready for repeated evaluation.
pub struct PreparedTemplate {
    parts: Vec<SharedExpr>,
}

impl std::fmt::Debug for PreparedTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedTemplate")
            .field("parts", &self.parts.len())
            .finish()
    }
}

impl PreparedTemplate {
    /// Parses template source. Errors carry the byte position of the
    /// offending construct.
    pub fn parse(src: &str) -> Result<PreparedTemplate> {
        let mut scanner = Scanner::new(src);
        Self::parse_with(&mut scanner, None)
    }

    /// Parses a `'...'` sub-template; the scanner must sit on the opening
    /// quote. Doubled quotes in literal runs collapse to one.
    pub(crate) fn parse_quoted(s: &mut Scanner) -> Result<PreparedTemplate> {
        let open = s.pos();
        s.bump();
        Self::parse_with(s, Some(open))
    }

    fn parse_with(s: &mut Scanner, quote_open: Option<usize>) -> Result<PreparedTemplate> {
        let mut parts: Vec<SharedExpr> = Vec::new();
        let mut literal = String::new();
        loop {
            if s.rest().starts_with("[%") {
                // [%% is the escape for a literal [%
                if s.rest().starts_with("[%%") {
                    s.eat("[%%");
                    literal.push_str("[%");
                    continue;
                }
                s.eat("[%");
                if !literal.is_empty() {
                    parts.push(Rc::new(Const::text(std::mem::take(&mut literal))));
                }
                parts.push(parse_placeholder(s)?);
                continue;
            }
            match (s.peek(), quote_open) {
                (None, Some(open)) => return Err(err_at(open, "Unexpected end of string")),
                (None, None) => break,
                (Some('\''), Some(_)) => {
                    s.bump();
                    if s.peek() == Some('\'') {
                        s.bump();
                        literal.push('\'');
                    } else {
                        break;
                    }
                }
                (Some(c), _) => {
                    s.bump();
                    literal.push(c);
                }
            }
        }
        if !literal.is_empty() {
            parts.push(Rc::new(Const::text(literal)));
        }
        Ok(PreparedTemplate { parts })
    }
}

impl ScriptExpression for PreparedTemplate {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        let mut out = String::new();
        for part in &self.parts {
            match part.calculate(ctx)? {
                None => return Ok(None),
                Some(text) => out.push_str(&text),
            }
        }
        Ok(Some(out))
    }
}

/// Parses one placeholder; the scanner sits just past `[%`.
fn parse_placeholder(s: &mut Scanner) -> Result<SharedExpr> {
    s.skip_ws();
    let prefix = if s.peek() == Some('(') {
        let open = s.pos();
        s.bump();
        let args = split_prefix(s, open)?;
        s.skip_ws();
        if s.at_end() {
            return Err(err_at(s.pos(), "Expression after variable type is empty"));
        }
        Some((open, args))
    } else {
        None
    };
    let func = if s.eat("!") {
        let name_pos = s.pos();
        let name = s.word().to_lowercase();
        if name.is_empty() || s.at_end() {
            return Err(err_at(name_pos, "End of string after function name"));
        }
        s.skip_ws();
        name
    } else {
        "var".to_string()
    };
    let provider: SharedExpr = match func.as_str() {
        "var" => providers::parse_var(s)?,
        "sys-var" | "env-var" => providers::parse_env(s)?,
        "map" => providers::parse_map(s)?,
        "if-var" => providers::parse_if(s, false)?,
        "if-value" => providers::parse_if(s, true)?,
        "now" => providers::parse_now(s)?,
        "var-by-name" => providers::parse_var_by_name(s)?,
        "substr" => providers::parse_substr(s)?,
        "replace" => providers::parse_replace(s)?,
        name => {
            s.skip_ws();
            if !s.eat("%]") {
                return Err(err_at(s.pos(), "End of var expected"));
            }
            Rc::new(providers::DeferredFn::new(name))
        }
    };
    let kind = match prefix {
        Some((pos, args)) => FormatKind::from_args(&args, pos)?,
        None => FormatKind::Plain,
    };
    Ok(Formatted::new(provider, kind))
}

/// Splits a `(type params...)` prefix into blank-separated words; quoted
/// params keep blanks and un-double their quotes. Consumes the `)`.
fn split_prefix(s: &mut Scanner, open: usize) -> Result<Vec<String>> {
    let mut args = Vec::new();
    loop {
        s.skip_ws();
        match s.peek() {
            None => {
                return Err(err_at(
                    open,
                    format!("No closing bracket from pos {} for variable type", open),
                ))
            }
            Some(')') => {
                s.bump();
                break;
            }
            Some('\'') => args.push(replace_bracket(s.quoted_raw()?, '\'')),
            Some(_) => {
                let mut word = String::new();
                while let Some(c) = s.peek() {
                    if c.is_whitespace() || c == ')' {
                        break;
                    }
                    s.bump();
                    word.push(c);
                }
                args.push(word);
            }
        }
    }
    if args.is_empty() {
        return Err(err_at(open, "Empty template format"));
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecContext;
    use crate::result::EngineError;

    fn ctx() -> ExecContext {
        let mut ctx = ExecContext::new("template-test");
        ctx.set_var("name", "O'Brien");
        ctx.set_var("status", "A");
        ctx.set_var_opt("gone", None);
        ctx
    }

    fn eval(src: &str) -> Result<Option<String>> {
        PreparedTemplate::parse(src)?.calculate(&mut ctx())
    }

    fn text(src: &str) -> String {
        eval(src).unwrap().unwrap()
    }

    #[test]
    fn test_literal_text_passes_through() {
        assert_eq!(text("select 1 from dual"), "select 1 from dual");
        assert_eq!(text(""), "");
    }

    #[test]
    fn test_open_brace_escape() {
        assert_eq!(text("a [%% b"), "a [% b");
        assert_eq!(text("[%%name%]"), "[%name%]");
    }

    #[test]
    fn test_plain_variable_placeholder() {
        assert_eq!(text("hello [% name %]!"), "hello O'Brien!");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let err = eval("[%nope%]").unwrap_err();
        assert_eq!(err.to_string(), "Variable 'nope' does not exist");
    }

    #[test]
    fn test_string_formatter_quotes_and_escapes() {
        assert_eq!(text("n = [%(string) name%]"), "n = 'O''Brien'");
    }

    #[test]
    fn test_formatted_null_renders_the_literal() {
        assert_eq!(text("v = [%(string) gone%]"), "v = NULL");
        assert_eq!(text("v = [%(datetime) gone%]"), "v = NULL");
    }

    #[test]
    fn test_untyped_null_placeholder_renders_the_literal() {
        assert_eq!(eval("a [%gone%] b").unwrap().as_deref(), Some("a NULL b"));
    }

    #[test]
    fn test_any_null_part_short_circuits() {
        let t = PreparedTemplate {
            parts: vec![
                Rc::new(Const::text("head")),
                Rc::new(Const::new(None)),
                Rc::new(Const::text("tail")),
            ],
        };
        assert_eq!(t.calculate(&mut ctx()).unwrap(), None);
    }

    #[test]
    fn test_number_formatter_with_pattern() {
        let mut c = ctx();
        c.set_var("amount", "1234567.891");
        let t = PreparedTemplate::parse("[%(number '#,##0.00') amount%]").unwrap();
        assert_eq!(t.calculate(&mut c).unwrap().as_deref(), Some("1,234,567.89"));
    }

    #[test]
    fn test_number_formatter_without_pattern_passes_through() {
        let mut c = ctx();
        c.set_var("amount", "00042.50");
        let t = PreparedTemplate::parse("[%(number) amount%]").unwrap();
        assert_eq!(t.calculate(&mut c).unwrap().as_deref(), Some("00042.50"));
    }

    #[test]
    fn test_env_provider_renders_null_when_unset() {
        assert_eq!(
            eval("[%!env-var NO_SUCH_VAR_FOR_SURE_42%]").unwrap().as_deref(),
            Some("NULL")
        );
        std::env::set_var("TEMPLATE_ENV_PROBE", "probe");
        assert_eq!(text("[%!sys-var TEMPLATE_ENV_PROBE%]"), "probe");
    }

    #[test]
    fn test_map_literal_branch_and_else() {
        let src = "[%!map status 'A' 'active' 'D' 'dropped' ELSE unknown%]";
        assert_eq!(text(src), "active");
        let mut c = ctx();
        c.set_var("status", "X");
        c.set_var("unknown", "?");
        let t = PreparedTemplate::parse(src).unwrap();
        assert_eq!(t.calculate(&mut c).unwrap().as_deref(), Some("?"));
    }

    #[test]
    fn test_map_null_and_undefined_branches() {
        assert_eq!(text("[%!map gone 'A' 'a' NULL 'none'%]"), "none");
        assert_eq!(text("[%!map ghost UNDEFINED 'new' ELSE 'old'%]"), "new");
    }

    #[test]
    fn test_map_without_matching_branch_is_an_error() {
        let err = eval("[%!map status 'B' 'b'%]").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expression for value 'A' of var 'status' not specified"
        );
    }

    #[test]
    fn test_map_rejects_unknown_keyword() {
        let err = eval("[%!map status OTHERWISE 'x'%]").unwrap_err();
        assert!(err.to_string().contains("Unknown map keyword 'OTHERWISE'"));
    }

    #[test]
    fn test_map_value_may_be_a_sub_template() {
        assert_eq!(
            text("[%!map status 'A' 'st=[%(string) name%]'%]"),
            "st='O''Brien'"
        );
    }

    #[test]
    fn test_sub_template_collapses_doubled_quotes() {
        assert_eq!(text("[%!if-var name 'it''s here'%]"), "it's here");
    }

    #[test]
    fn test_if_var_defaults_to_empty() {
        assert_eq!(text("<[%!if-var ghost name%]>"), "<>");
        assert_eq!(text("[%!if-var name 'yes' ELSE 'no'%]"), "yes");
    }

    #[test]
    fn test_if_value_requires_substance() {
        assert_eq!(text("[%!if-value gone 'set' ELSE 'unset'%]"), "unset");
        let mut c = ctx();
        c.set_var("blank", "");
        let t = PreparedTemplate::parse("[%!if-value blank 'set' ELSE 'unset'%]").unwrap();
        assert_eq!(t.calculate(&mut c).unwrap().as_deref(), Some("unset"));
        assert_eq!(text("[%!if-value name 'set' ELSE 'unset'%]"), "set");
    }

    #[test]
    fn test_if_rejects_a_stray_word() {
        let err = eval("[%!if-var name 'a' otherwise 'b'%]").unwrap_err();
        assert!(err
            .to_string()
            .contains("'Else' expected but 'otherwise' found"));
    }

    #[test]
    fn test_now_provider_honors_an_explicit_format() {
        let year = format!("{}", chrono::Local::now().format("%Y"));
        assert_eq!(text("[%!now %Y%]"), year);
    }

    #[test]
    fn test_var_by_name_follows_the_indirection() {
        let mut c = ctx();
        c.set_var("pointer", "name");
        let t = PreparedTemplate::parse("[%!var-by-name pointer%]").unwrap();
        assert_eq!(t.calculate(&mut c).unwrap().as_deref(), Some("O'Brien"));
    }

    #[test]
    fn test_substr_clamps_and_understands_minus_one() {
        assert_eq!(text("[%!substr 2 -1 name%]"), "Brien");
        assert_eq!(text("[%!substr 0 1 name%]"), "O");
        assert_eq!(text("[%!substr 3 99 'abcd'%]"), "d");
    }

    #[test]
    fn test_substr_premature_end() {
        let err = eval("[%!substr 1%]").unwrap_err();
        assert!(err.to_string().contains("Unexpected end of substr"));
    }

    #[test]
    fn test_replace_provider_is_a_regex_replace_all() {
        assert_eq!(text("[%!replace '-' '_' 'a-b-c'%]"), "a_b_c");
        assert_eq!(
            text(r"[%!replace '(\w+)\.' '$1!' 'one. two.'%]"),
            "one! two!"
        );
    }

    #[test]
    fn test_replace_null_operand_renders_null() {
        assert_eq!(
            eval("[%!replace 'x' 'y' gone%]").unwrap().as_deref(),
            Some("NULL")
        );
    }

    #[test]
    fn test_unknown_function_fails_at_evaluation() {
        let t = PreparedTemplate::parse("[%!frobnicate%]").unwrap();
        let err = t.calculate(&mut ctx()).unwrap_err();
        assert_eq!(err.to_string(), "Function 'frobnicate' for template not found");
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = PreparedTemplate::parse("ab [%name").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Template error at position 5: No closing brackets for variable"
        );
    }

    #[test]
    fn test_unterminated_type_prefix() {
        let err = PreparedTemplate::parse("[%(string name%]").unwrap_err();
        assert!(err
            .to_string()
            .contains("No closing bracket from pos 2 for variable type"));
    }

    #[test]
    fn test_empty_type_prefix() {
        let err = PreparedTemplate::parse("[%() name%]").unwrap_err();
        assert!(err.to_string().contains("Empty template format"));
    }

    #[test]
    fn test_nothing_after_type_prefix() {
        let err = PreparedTemplate::parse("[%(string) ").unwrap_err();
        assert!(err
            .to_string()
            .contains("Expression after variable type is empty"));
        assert!(matches!(err, EngineError::Template { .. }));
    }

    #[test]
    fn test_bare_function_marker() {
        let err = PreparedTemplate::parse("[%! %]").unwrap_err();
        assert!(err.to_string().contains("End of string after function name"));
    }
}
