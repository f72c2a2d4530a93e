//! Rendering of expression trees into query-language text.

use super::types::{Operand, Operator, QueryExpression, QueryValue, Term};
use crate::error::{ClientError, Result};

/// Characters that are always backslash-escaped inside values.
pub(super) const RESERVED: &[char] = &['*', '?', '|', ' ', ',', ';', '\'', '\\'];

/// Compile an expression into the broker's `q` syntax.
///
/// Terms are joined with `;` in tree order, so the same tree always yields
/// the same string.
pub fn compile(expr: &QueryExpression) -> Result<String> {
    let mut out = String::new();
    for (index, term) in expr.terms.iter().enumerate() {
        if index > 0 {
            out.push(';');
        }
        compile_term(index, term, &mut out)?;
    }
    Ok(out)
}

fn compile_term(index: usize, term: &Term, out: &mut String) -> Result<()> {
    check_attribute(&term.attribute).map_err(|reason| grammar(index, &term.attribute, reason))?;

    out.push_str(&term.attribute);
    out.push_str(term.operator.symbol());

    match (term.operator, &term.operand) {
        (Operator::Match, Operand::Single(QueryValue::Text(pattern))) => {
            compile_pattern(index, pattern, out)
        }
        (Operator::Match, other) => Err(grammar(
            index,
            operand_token(other),
            "pattern operator requires a text value",
        )),

        (Operator::Range, Operand::Bounds(low, high)) => {
            let compatible = (low.is_numeric() && high.is_numeric())
                || matches!((low, high), (QueryValue::Text(_), QueryValue::Text(_)));
            if !compatible {
                return Err(grammar(
                    index,
                    operand_token(&term.operand),
                    "range bounds must both be numbers or both be text",
                ));
            }
            write_value(index, low, out)?;
            out.push_str("..");
            write_value(index, high, out)
        }
        (Operator::Range, other) => Err(grammar(
            index,
            operand_token(other),
            "range operator requires two bounds",
        )),
        (_, Operand::Bounds(..)) => Err(grammar(
            index,
            operand_token(&term.operand),
            "bounds are only valid with the range operator",
        )),

        (Operator::Equal | Operator::NotEqual, Operand::AnyOf(values)) => {
            if values.len() < 2 {
                return Err(grammar(
                    index,
                    operand_token(&term.operand),
                    "value list needs at least two values",
                ));
            }
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(index, value, out)?;
            }
            Ok(())
        }
        (_, Operand::AnyOf(_)) => Err(grammar(
            index,
            operand_token(&term.operand),
            "value lists are only valid with == and !=",
        )),

        (op, Operand::Single(value)) => {
            if op.is_ordering() && matches!(value, QueryValue::Bool(_)) {
                return Err(grammar(
                    index,
                    value_token(value),
                    "ordering operators do not apply to booleans",
                ));
            }
            write_value(index, value, out)
        }
    }
}

/// Patterns go out verbatim; only a statement separator would break them.
fn compile_pattern(index: usize, pattern: &str, out: &mut String) -> Result<()> {
    if pattern.is_empty() {
        return Err(grammar(index, pattern, "empty pattern"));
    }
    if let Some(c) = pattern.chars().find(|c| !is_printable_ascii(*c)) {
        return Err(grammar(
            index,
            pattern,
            format!("character {:?} cannot be represented", c),
        ));
    }
    if has_unescaped_separator(pattern) {
        return Err(grammar(index, pattern, "pattern contains an unescaped ';'"));
    }
    regex::Regex::new(pattern)
        .map_err(|e| grammar(index, pattern, format!("invalid pattern: {}", e)))?;

    out.push_str(pattern);
    Ok(())
}

fn write_value(index: usize, value: &QueryValue, out: &mut String) -> Result<()> {
    match value {
        QueryValue::Integer(i) => out.push_str(&i.to_string()),
        QueryValue::Float(f) => {
            if !f.is_finite() {
                return Err(grammar(index, f.to_string(), "non-finite number"));
            }
            // Debug keeps a fractional part or exponent, so the text never
            // reads back as an integer.
            out.push_str(&format!("{:?}", f));
        }
        QueryValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        QueryValue::Text(text) => {
            if let Some(c) = text.chars().find(|c| !is_printable_ascii(*c)) {
                return Err(grammar(
                    index,
                    text,
                    format!("character {:?} cannot be escaped", c),
                ));
            }
            if looks_literal(text) {
                out.push('\'');
                escape_into(text, out);
                out.push('\'');
            } else {
                escape_into(text, out);
            }
        }
    }
    Ok(())
}

/// Backslash-escape reserved characters of a text value.
///
/// Besides [`RESERVED`], a `.` is escaped when it touches another `.` or a
/// value edge, keeping `..` unambiguous as the range separator, and a
/// leading `=` is escaped so `>` followed by `=x` never reads as `>=`.
pub(super) fn escape_into(text: &str, out: &mut String) {
    let chars: Vec<char> = text.chars().collect();
    let last = chars.len().saturating_sub(1);
    for (i, &c) in chars.iter().enumerate() {
        let dot_edge = c == '.'
            && (i == 0
                || i == last
                || chars.get(i + 1) == Some(&'.')
                || chars[i - 1] == '.');
        if RESERVED.contains(&c) || dot_edge || (i == 0 && c == '=') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Validate an attribute path: identifier segments joined by `.`.
pub(super) fn check_attribute(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("empty attribute name".to_string());
    }
    for segment in name.split('.') {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            Some(c) => {
                return Err(format!(
                    "attribute segment {:?} cannot start with {:?}",
                    segment, c
                ))
            }
            None => return Err(format!("empty segment in attribute {:?}", name)),
        }
        if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
            return Err(format!("invalid character {:?} in attribute name", c));
        }
    }
    Ok(())
}

/// Read a bare token as a number, if it is one.
pub(super) fn parse_number(s: &str) -> Option<QueryValue> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(QueryValue::Integer(i));
    }
    // f64::from_str also takes "inf" and "NaN"; only plain decimal forms count.
    let numeric_chars = s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if numeric_chars && s.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() {
                return Some(QueryValue::Float(f));
            }
        }
    }
    None
}

/// Text that would read back as something other than text unless quoted.
pub(super) fn looks_literal(text: &str) -> bool {
    text.is_empty() || text == "true" || text == "false" || parse_number(text).is_some()
}

pub(super) fn is_printable_ascii(c: char) -> bool {
    c.is_ascii() && !c.is_ascii_control()
}

/// True if `s` has a `;` that is not preceded by an escaping backslash.
pub(super) fn has_unescaped_separator(s: &str) -> bool {
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ';' {
            return true;
        }
    }
    false
}

fn grammar(term: usize, token: impl Into<String>, reason: impl Into<String>) -> ClientError {
    ClientError::Grammar {
        term,
        token: token.into(),
        reason: reason.into(),
    }
}

fn value_token(value: &QueryValue) -> String {
    match value {
        QueryValue::Integer(i) => i.to_string(),
        QueryValue::Float(f) => f.to_string(),
        QueryValue::Bool(b) => b.to_string(),
        QueryValue::Text(t) => t.clone(),
    }
}

fn operand_token(operand: &Operand) -> String {
    match operand {
        Operand::Single(v) => value_token(v),
        Operand::AnyOf(values) => values.iter().map(value_token).collect::<Vec<_>>().join(","),
        Operand::Bounds(low, high) => format!("{}..{}", value_token(low), value_token(high)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_terms(terms: Vec<Term>) -> Result<String> {
        compile(&QueryExpression { terms })
    }

    #[test]
    fn test_conjunction() {
        let expr = QueryExpression::new()
            .and(Term::gt("temperature", 30))
            .and(Term::lt("temperature", 40));
        assert_eq!(compile(&expr).unwrap(), "temperature>30;temperature<40");
    }

    #[test]
    fn test_star_is_escaped() {
        let q = compile_terms(vec![Term::eq("name", "Bos*")]).unwrap();
        assert_eq!(q, r"name==Bos\*");
    }

    #[test]
    fn test_reserved_characters() {
        let q = compile_terms(vec![Term::eq("name", "a b|c?d,e;f'g\\h")]).unwrap();
        assert_eq!(q, r"name==a\ b\|c\?d\,e\;f\'g\\h");
    }

    #[test]
    fn test_dots_near_separator_are_escaped() {
        let q = compile_terms(vec![Term::eq("version", "1.2..3.")]).unwrap();
        assert_eq!(q, r"version==1.2\.\.3\.");

        let q = compile_terms(vec![Term::eq("host", "a.b.c")]).unwrap();
        assert_eq!(q, "host==a.b.c");
    }

    #[test]
    fn test_literal_looking_text_is_quoted() {
        assert_eq!(compile_terms(vec![Term::eq("code", "30")]).unwrap(), "code=='30'");
        assert_eq!(compile_terms(vec![Term::eq("flag", "true")]).unwrap(), "flag=='true'");
        assert_eq!(compile_terms(vec![Term::eq("name", "")]).unwrap(), "name==''");
        assert_eq!(compile_terms(vec![Term::eq("flag", true)]).unwrap(), "flag==true");
    }

    #[test]
    fn test_leading_equals_is_escaped() {
        assert_eq!(compile_terms(vec![Term::gt("name", "=x")]).unwrap(), r"name>\=x");
    }

    #[test]
    fn test_floats_keep_fraction() {
        assert_eq!(compile_terms(vec![Term::ge("t", 30.0)]).unwrap(), "t>=30.0");
        assert_eq!(compile_terms(vec![Term::le("t", -0.5)]).unwrap(), "t<=-0.5");
    }

    #[test]
    fn test_range_and_lists() {
        assert_eq!(
            compile_terms(vec![Term::between("temperature", 10, 20.5)]).unwrap(),
            "temperature==10..20.5"
        );
        assert_eq!(
            compile_terms(vec![Term::one_of("color", ["red", "blue"])]).unwrap(),
            "color==red,blue"
        );
        assert_eq!(
            compile_terms(vec![Term::matches("name", "^Bo.*")]).unwrap(),
            "name~=^Bo.*"
        );
    }

    #[test]
    fn test_pattern_on_number_rejected() {
        let term = Term::new("t", Operator::Match, Operand::Single(QueryValue::Integer(3)));
        let err = compile_terms(vec![term]).unwrap_err();
        assert!(matches!(err, ClientError::Grammar { term: 0, .. }));
    }

    #[test]
    fn test_invalid_combinations_rejected() {
        let cases = vec![
            Term::gt("flag", true),
            Term::between("t", 1, "high"),
            Term::new("t", Operator::GreaterThan, Operand::AnyOf(vec![1.into(), 2.into()])),
            Term::new("t", Operator::Equal, Operand::AnyOf(vec![1.into()])),
            Term::new("t", Operator::Equal, Operand::Bounds(1.into(), 2.into())),
            Term::new("t", Operator::Range, Operand::Single(1.into())),
            Term::eq("t", f64::NAN),
            Term::eq("name", "caf\u{e9}"),
            Term::eq("name", "line\nbreak"),
            Term::matches("name", "a;b"),
            Term::matches("name", "("),
        ];
        for term in cases {
            let result = compile_terms(vec![term.clone()]);
            assert!(
                matches!(result, Err(ClientError::Grammar { .. })),
                "expected grammar error for {:?}",
                term
            );
        }
    }

    #[test]
    fn test_attribute_names_validated_not_escaped() {
        assert!(compile_terms(vec![Term::eq("address.city", "Berlin")]).is_ok());
        assert!(compile_terms(vec![Term::eq("bad*name", 1)]).is_err());
        assert!(compile_terms(vec![Term::eq("1st", 1)]).is_err());
        assert!(compile_terms(vec![Term::eq("a..b", 1)]).is_err());

        let err = compile(
            &QueryExpression::new()
                .and(Term::eq("ok", 1))
                .and(Term::eq("not ok", 1)),
        )
        .unwrap_err();
        match err {
            ClientError::Grammar { term, token, .. } => {
                assert_eq!(term, 1);
                assert_eq!(token, "not ok");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_deterministic() {
        let expr = QueryExpression::new()
            .and(Term::one_of("status", ["on", "off"]))
            .and(Term::between("pressure", 1.5, 3.0));
        assert_eq!(compile(&expr).unwrap(), compile(&expr.clone()).unwrap());
    }
}
