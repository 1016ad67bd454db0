//! Template engine tests against the public surface.

use anyhow::Result;
use dray::context::Context;
use dray::script::ScriptExpression;
use dray::{ExecContext, PreparedTemplate};
use proptest::prelude::*;

fn render(ctx: &mut ExecContext, src: &str) -> Result<Option<String>> {
    Ok(PreparedTemplate::parse(src)?.calculate(ctx)?)
}

#[test]
fn test_sql_update_with_mixed_placeholders() -> Result<()> {
    let mut ctx = ExecContext::new("t");
    ctx.set_var("table", "accounts");
    ctx.set_var("owner", "O'Brien");
    ctx.set_var_opt("closed", None);
    let out = render(
        &mut ctx,
        "update [%table%] set owner = [%(string) owner%], closed = [%(string) closed%]",
    )?;
    assert_eq!(
        out.as_deref(),
        Some("update accounts set owner = 'O''Brien', closed = NULL"),
    );
    Ok(())
}

#[test]
fn test_datetime_formatter_quotes_the_value() -> Result<()> {
    let mut ctx = ExecContext::new("t");
    ctx.set_var("since", "20240115 10:30:00.000");
    let out = render(&mut ctx, "where changed > [%(datetime) since%]")?;
    assert_eq!(out.as_deref(), Some("where changed > '20240115 10:30:00.000'"));
    Ok(())
}

#[test]
fn test_number_formatter_groups_digits() -> Result<()> {
    let mut ctx = ExecContext::new("t");
    ctx.set_var("balance", "9876543.218");
    let out = render(&mut ctx, "[%(number '#,##0.00') balance%]")?;
    assert_eq!(out.as_deref(), Some("9,876,543.22"));
    Ok(())
}

#[test]
fn test_map_provider_translates_codes() -> Result<()> {
    let mut ctx = ExecContext::new("t");
    ctx.set_var("code", "F");
    let src = "[%!map code 'F' 'full' 'I' 'incremental' ELSE 'unknown'%]";
    assert_eq!(render(&mut ctx, src)?.as_deref(), Some("full"));
    ctx.set_var("code", "Z");
    assert_eq!(render(&mut ctx, src)?.as_deref(), Some("unknown"));
    Ok(())
}

#[test]
fn test_reparse_is_not_needed_between_evaluations() -> Result<()> {
    let mut ctx = ExecContext::new("t");
    let template = PreparedTemplate::parse("n=[%n%]")?;
    for i in 0..3 {
        ctx.set_var("n", &i.to_string());
        assert_eq!(
            template.calculate(&mut ctx)?.as_deref(),
            Some(format!("n={}", i).as_str())
        );
    }
    Ok(())
}

#[test]
fn test_parse_error_carries_a_position() {
    let err = PreparedTemplate::parse("select [%col").unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("Template error at position 9:"), "{}", text);
}

proptest! {
    // Text without an opening brace is inert: it renders back unchanged.
    #[test]
    fn prop_literal_text_renders_unchanged(s in "[^\\[]{0,64}") {
        let mut ctx = ExecContext::new("prop");
        let out = PreparedTemplate::parse(&s).unwrap().calculate(&mut ctx).unwrap();
        prop_assert_eq!(out.as_deref(), Some(s.as_str()));
    }

    // Doubling the % of every [% escapes all placeholders, so any text at
    // all survives a round trip through the escape.
    #[test]
    fn prop_escaped_text_renders_unchanged(s in ".{0,64}") {
        let escaped = s.replace("[%", "[%%");
        let mut ctx = ExecContext::new("prop");
        let out = PreparedTemplate::parse(&escaped).unwrap().calculate(&mut ctx).unwrap();
        prop_assert_eq!(out.as_deref(), Some(s.as_str()));
    }
}
