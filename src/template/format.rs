//! Formatter wrappers around placeholder providers

use crate::context::{format_datetime, Context};
use crate::result::{EngineError, Result};
use crate::script::{ScriptExpression, SharedExpr};
use crate::template::scan::err_at;
use crate::text::{escape_sql_string, replace_chars};
use chrono::NaiveDateTime;
use std::rc::Rc;

/// Formatting rule applied to a placeholder's value.
///
/// Every placeholder carries one of these; an untyped placeholder gets
/// [`FormatKind::Plain`]. The wrapper renders a null inner value as the
/// literal `NULL` before any formatting happens, so generated SQL keeps
/// its null literals unquoted and unescaped.
#[derive(Debug)]
pub(crate) enum FormatKind {
    Plain,
    SqlString,
    Datetime,
    DateReformat(String),
    Number(Option<DecimalPattern>),
    Binary,
    CharReplace(Vec<(char, String)>),
    Surround { prefix: String, postfix: String },
}

const CDATA_TABLE: [(char, &str); 4] =
    [('"', "&quot;"), ('<', "&lt;"), ('>', "&gt;"), ('&', "&amp;")];
const CDATA2_TABLE: [(char, &str); 4] = [
    ('"', "&amp;quot;"),
    ('<', "&amp;lt;"),
    ('>', "&amp;gt;"),
    ('&', "&amp;amp;"),
];

fn owned_table(table: &[(char, &str)]) -> Vec<(char, String)> {
    table.iter().map(|(c, s)| (*c, s.to_string())).collect()
}

fn replace_table(args: &[String], pos: usize) -> Result<Vec<(char, String)>> {
    let mut table = Vec::new();
    let mut pairs = args.chunks(2);
    for pair in &mut pairs {
        let [from, to] = pair else {
            return Err(err_at(pos, "Replace formatter needs char/text pairs"));
        };
        let mut chars = from.chars();
        let ch = match chars.next() {
            Some('\\') => match chars.next() {
                Some('n') => '\n',
                Some('r') => '\r',
                Some('t') => '\t',
                Some(other) => other,
                None => return Err(err_at(pos, "Dangling escape in replace formatter")),
            },
            Some(ch) => ch,
            None => return Err(err_at(pos, "Empty char in replace formatter")),
        };
        table.push((ch, to.clone()));
    }
    Ok(table)
}

fn sep_char(args: &[String], ix: usize, default: char) -> char {
    args.get(ix)
        .and_then(|s| s.chars().next())
        .unwrap_or(default)
}

impl FormatKind {
    /// Resolves a `(type params...)` prefix. `args[0]` is the type name;
    /// `pos` is where the prefix started, for error reporting.
    pub(crate) fn from_args(args: &[String], pos: usize) -> Result<FormatKind> {
        let Some((name, params)) = args.split_first() else {
            return Err(err_at(pos, "Empty template format"));
        };
        match name.as_str() {
            "string" => Ok(FormatKind::SqlString),
            "datetime" => Ok(FormatKind::Datetime),
            "date-format" => match params.first() {
                Some(fmt) => Ok(FormatKind::DateReformat(fmt.clone())),
                None => Err(err_at(pos, "Formatter 'date-format' requires a format")),
            },
            "number" => {
                let pattern = match params.first() {
                    Some(p) => Some(DecimalPattern::parse(
                        p,
                        sep_char(params, 1, '.'),
                        sep_char(params, 2, ','),
                    )),
                    None => None,
                };
                Ok(FormatKind::Number(pattern))
            }
            "binary" => Ok(FormatKind::Binary),
            "replace" => Ok(FormatKind::CharReplace(replace_table(params, pos)?)),
            "cdata" => Ok(FormatKind::CharReplace(owned_table(&CDATA_TABLE))),
            "cdata2" => Ok(FormatKind::CharReplace(owned_table(&CDATA2_TABLE))),
            "surround" => Ok(FormatKind::Surround {
                prefix: params.first().cloned().unwrap_or_default(),
                postfix: params.get(1).cloned().unwrap_or_default(),
            }),
            other => Err(err_at(pos, format!("Unknown variable type '{}'", other))),
        }
    }

    fn apply(&self, value: &str, ctx: &mut dyn Context) -> Result<String> {
        match self {
            FormatKind::Plain => Ok(value.to_string()),
            FormatKind::SqlString => {
                let mut out = String::with_capacity(value.len() + 2);
                escape_sql_string(&mut out, value);
                Ok(out)
            }
            FormatKind::Datetime => Ok(format!("'{}'", value)),
            FormatKind::DateReformat(target) => {
                let parsed = NaiveDateTime::parse_from_str(value, ctx.date_format())
                    .map_err(|e| {
                        EngineError::Format(format!("Cannot parse date '{}': {}", value, e))
                    })?;
                format_datetime(&parsed, target)
            }
            FormatKind::Number(pattern) => match pattern {
                Some(pattern) => pattern.format(value),
                None => Ok(value.to_string()),
            },
            FormatKind::Binary => Ok(format!("0x{}", value)),
            FormatKind::CharReplace(table) => Ok(replace_chars(value, table)),
            FormatKind::Surround { prefix, postfix } => {
                Ok(format!("{}{}{}", prefix, value, postfix))
            }
        }
    }
}

/// A provider wrapped in its formatter: the evaluated form of one
/// `[%...%]` placeholder.
pub(crate) struct Formatted {
    inner: SharedExpr,
    kind: FormatKind,
}

impl Formatted {
    pub(crate) fn new(inner: SharedExpr, kind: FormatKind) -> Rc<Self> {
        Rc::new(Formatted { inner, kind })
    }
}

impl ScriptExpression for Formatted {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        match self.inner.calculate(ctx)? {
            None => Ok(Some("NULL".to_string())),
            Some(value) => Ok(Some(self.kind.apply(&value, ctx)?)),
        }
    }
}

/// The `#,##0.00` subset of decimal-format patterns: grouping size,
/// minimum integer digits, minimum and maximum fraction digits, custom
/// separators. Rounds half to even.
#[derive(Debug)]
pub(crate) struct DecimalPattern {
    group_size: usize,
    min_int: usize,
    min_frac: usize,
    max_frac: usize,
    dec_sep: char,
    group_sep: char,
}

impl DecimalPattern {
    pub(crate) fn parse(pattern: &str, dec_sep: char, group_sep: char) -> Self {
        let (int_part, frac_part) = match pattern.split_once('.') {
            Some((i, f)) => (i, f),
            None => (pattern, ""),
        };
        let group_size = match int_part.rfind(',') {
            Some(ix) => int_part.len() - ix - 1,
            None => 0,
        };
        DecimalPattern {
            group_size,
            min_int: int_part.chars().filter(|c| *c == '0').count().max(1),
            min_frac: frac_part.chars().filter(|c| *c == '0').count(),
            max_frac: frac_part.chars().filter(|c| *c == '0' || *c == '#').count(),
            dec_sep,
            group_sep,
        }
    }

    pub(crate) fn format(&self, text: &str) -> Result<String> {
        let value: f64 = text.trim().parse().map_err(|_| {
            EngineError::Format(format!("Cannot format '{}' as a number", text))
        })?;
        let negative = value.is_sign_negative() && value != 0.0;
        let scale = 10f64.powi(self.max_frac as i32);
        let scaled = round_half_even(value.abs() * scale) as u128;
        let int_part = scaled / scale as u128;
        let frac_part = scaled % scale as u128;

        let mut int_digits = int_part.to_string();
        while int_digits.len() < self.min_int {
            int_digits.insert(0, '0');
        }
        let grouped = self.group(&int_digits);

        let mut frac_digits = format!("{:0>width$}", frac_part, width = self.max_frac);
        while frac_digits.len() > self.min_frac && frac_digits.ends_with('0') {
            frac_digits.pop();
        }

        let mut out = String::new();
        if negative && (int_part > 0 || frac_part > 0) {
            out.push('-');
        }
        out.push_str(&grouped);
        if !frac_digits.is_empty() {
            out.push(self.dec_sep);
            out.push_str(&frac_digits);
        }
        Ok(out)
    }

    fn group(&self, digits: &str) -> String {
        if self.group_size == 0 || digits.len() <= self.group_size {
            return digits.to_string();
        }
        let mut out = String::with_capacity(digits.len() + digits.len() / self.group_size);
        for (i, ch) in digits.chars().enumerate() {
            let left = digits.len() - i;
            if i > 0 && left % self.group_size == 0 {
                out.push(self.group_sep);
            }
            out.push(ch);
        }
        out
    }
}

fn round_half_even(x: f64) -> f64 {
    let floor = x.floor();
    if (x - floor - 0.5).abs() < 1e-9 {
        if (floor as u128) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        x.round()
    }
}
