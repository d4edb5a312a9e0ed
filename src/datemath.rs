//! # Date-Math Template Resolution
//!
//! Expands templated names of the form `<literal{date-math{format|tz}}literal>`
//! against a single reference timestamp. The resolver exists so that
//! generated artifact names (snapshot names in particular) can embed the day
//! they were produced without any step reaching for wall-clock state of its
//! own.
//!
//! [`ResolverContext`] carries only the reference instant. Anything that
//! would need cluster state or index-pattern expansion (fixed-date anchors,
//! named time zones) is rejected with a typed error by construction.

use crate::error::{LifecycleError, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, TimeZone, Timelike, Utc};

/// Default rendering for resolved expressions, matching the conventional
/// dotted day format used in generated index and snapshot names.
const DEFAULT_FORMAT: &str = "yyyy.MM.dd";

/// Resolution context: nothing but the instant the invoking step started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverContext {
    start_time: DateTime<Utc>,
}

impl ResolverContext {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self { start_time }
    }

    /// Context anchored at the current wall clock.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }
}

/// Stateless expander for date-math templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateMathResolver;

impl DateMathResolver {
    /// Expand every `{...}` segment of a `<...>` template. Expressions not
    /// wrapped in angle brackets are returned unchanged.
    pub fn resolve(&self, expression: &str, ctx: &ResolverContext) -> Result<String> {
        if !(expression.starts_with('<') && expression.ends_with('>') && expression.len() >= 2) {
            return Ok(expression.to_string());
        }
        let inner = &expression[1..expression.len() - 1];

        let mut out = String::with_capacity(inner.len());
        let mut rest = inner;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let body = &rest[open + 1..];
            let close = find_matching_brace(body).ok_or_else(|| LifecycleError::DateMath {
                expression: expression.to_string(),
                message: "unbalanced braces in template".to_string(),
            })?;
            out.push_str(&resolve_expression(&body[..close], expression, ctx)?);
            rest = &body[close + 1..];
        }
        if rest.contains('}') {
            return Err(LifecycleError::DateMath {
                expression: expression.to_string(),
                message: "unbalanced braces in template".to_string(),
            });
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Position of the `}` closing a segment that may contain one nested format
/// brace pair, as in `now/d{yyyy.MM.dd}`.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn resolve_expression(
    segment: &str,
    template: &str,
    ctx: &ResolverContext,
) -> Result<String> {
    let err = |message: String| LifecycleError::DateMath {
        expression: template.to_string(),
        message,
    };

    // Split off an optional trailing {format|time_zone} section.
    let (math, format, offset) = match segment.find('{') {
        Some(pos) => {
            if !segment.ends_with('}') {
                return Err(err("malformed format section".to_string()));
            }
            let spec = &segment[pos + 1..segment.len() - 1];
            let (fmt, tz) = match spec.split_once('|') {
                Some((fmt, tz)) => (fmt, Some(tz)),
                None => (spec, None),
            };
            let offset = match tz {
                Some(tz) => Some(parse_offset(tz).ok_or_else(|| {
                    err(format!(
                        "unsupported time zone [{tz}]: only fixed offsets are available"
                    ))
                })?),
                None => None,
            };
            (&segment[..pos], fmt, offset)
        }
        None => (segment, DEFAULT_FORMAT, None),
    };

    let rest = math.strip_prefix("now").ok_or_else(|| {
        err(format!(
            "expression [{math}] is not anchored at now; fixed anchors need \
             index-resolution context that is not carried here"
        ))
    })?;

    let offset = offset.unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    let mut time = ctx.start_time().with_timezone(&offset);

    let mut ops = rest;
    while !ops.is_empty() {
        let sign = ops.chars().next().unwrap();
        ops = &ops[1..];
        match sign {
            '/' => {
                let unit = ops.chars().next().ok_or_else(|| {
                    err("missing rounding unit".to_string())
                })?;
                ops = &ops[unit.len_utf8()..];
                time = round_down(time, unit)
                    .ok_or_else(|| err(format!("unsupported rounding unit [{unit}]")))?;
            }
            '+' | '-' => {
                let digits: String = ops.chars().take_while(char::is_ascii_digit).collect();
                ops = &ops[digits.len()..];
                let amount: i64 = if digits.is_empty() {
                    1
                } else {
                    digits
                        .parse()
                        .map_err(|_| err(format!("invalid amount [{digits}]")))?
                };
                let unit = ops
                    .chars()
                    .next()
                    .ok_or_else(|| err("missing unit after amount".to_string()))?;
                ops = &ops[unit.len_utf8()..];
                let signed = if sign == '-' { -amount } else { amount };
                time = apply_offset(time, signed, unit)
                    .ok_or_else(|| err(format!("unsupported unit [{unit}]")))?;
            }
            other => {
                return Err(err(format!("unexpected character [{other}] in expression")));
            }
        }
    }

    let chrono_format = translate_format(format).map_err(err)?;
    Ok(time.format(&chrono_format).to_string())
}

/// `+HH:MM` / `-HH:MM` fixed offsets only; named zones need a tz database
/// this engine does not ship.
fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let (sign, body) = match tz.strip_prefix('+') {
        Some(body) => (1, body),
        None => (-1, tz.strip_prefix('-')?),
    };
    let (hours, minutes) = body.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn apply_offset(time: DateTime<FixedOffset>, amount: i64, unit: char) -> Option<DateTime<FixedOffset>> {
    match unit {
        'y' => shift_months(time, amount.checked_mul(12)?),
        'M' => shift_months(time, amount),
        'w' => time.checked_add_signed(Duration::weeks(amount)),
        'd' => time.checked_add_signed(Duration::days(amount)),
        'h' | 'H' => time.checked_add_signed(Duration::hours(amount)),
        'm' => time.checked_add_signed(Duration::minutes(amount)),
        's' => time.checked_add_signed(Duration::seconds(amount)),
        _ => None,
    }
}

fn shift_months(time: DateTime<FixedOffset>, months: i64) -> Option<DateTime<FixedOffset>> {
    let months_abs = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        time.checked_add_months(Months::new(months_abs))
    } else {
        time.checked_sub_months(Months::new(months_abs))
    }
}

fn round_down(time: DateTime<FixedOffset>, unit: char) -> Option<DateTime<FixedOffset>> {
    let tz = *time.offset();
    let date = time.date_naive();
    match unit {
        'y' => tz
            .with_ymd_and_hms(date.year(), 1, 1, 0, 0, 0)
            .single(),
        'M' => tz
            .with_ymd_and_hms(date.year(), date.month(), 1, 0, 0, 0)
            .single(),
        'w' => {
            let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
            tz.with_ymd_and_hms(monday.year(), monday.month(), monday.day(), 0, 0, 0)
                .single()
        }
        'd' => tz
            .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
            .single(),
        'h' | 'H' => tz
            .with_ymd_and_hms(date.year(), date.month(), date.day(), time.hour(), 0, 0)
            .single(),
        'm' => tz
            .with_ymd_and_hms(
                date.year(),
                date.month(),
                date.day(),
                time.hour(),
                time.minute(),
                0,
            )
            .single(),
        's' => time.with_nanosecond(0),
        _ => None,
    }
}

/// Translate the Java-style date pattern subset used in templates into a
/// chrono format string.
fn translate_format(pattern: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(pattern.len());
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        match (c, run) {
            ('y' | 'u', 4..) => out.push_str("%Y"),
            ('y' | 'u', _) => out.push_str("%y"),
            ('M', _) => out.push_str("%m"),
            ('d', _) => out.push_str("%d"),
            ('H', _) => out.push_str("%H"),
            ('h', _) => out.push_str("%I"),
            ('m', _) => out.push_str("%M"),
            ('s', _) => out.push_str("%S"),
            ('S', _) => out.push_str("%3f"),
            (c, _) if c.is_ascii_alphabetic() => {
                return Err(format!("unsupported format token [{c}]"));
            }
            ('%', _) => out.push_str("%%"),
            (c, run) => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
        i += run;
    }
    Ok(out)
}
