//! Parsing of query-language text back into expression trees.

use super::compiler::{check_attribute, is_printable_ascii, parse_number};
use super::types::{Operand, Operator, QueryExpression, QueryValue, Term};
use crate::error::{ClientError, Result};

/// Operators in match order; two-character forms first.
const OPERATORS: &[(&str, Operator)] = &[
    ("==", Operator::Equal),
    ("!=", Operator::NotEqual),
    (">=", Operator::GreaterOrEqual),
    ("<=", Operator::LessOrEqual),
    ("~=", Operator::Match),
    (">", Operator::GreaterThan),
    ("<", Operator::LessThan),
];

/// A value character with its escape flag and absolute position.
#[derive(Clone, Copy, Debug)]
struct Lexeme {
    c: char,
    escaped: bool,
    pos: usize,
}

/// Parse `q` syntax into an expression.
///
/// Accepts every string [`compile`](super::compile) produces. Errors carry
/// the byte position and the offending token.
pub fn parse(input: &str) -> Result<QueryExpression> {
    if let Some((pos, c)) = input.char_indices().find(|(_, c)| !is_printable_ascii(*c)) {
        return Err(syntax(pos, c.to_string(), "query text must be printable ASCII"));
    }

    let mut terms = Vec::new();
    if input.is_empty() {
        return Ok(QueryExpression { terms });
    }

    for (offset, statement) in split_statements(input)? {
        terms.push(parse_statement(offset, statement)?);
    }
    Ok(QueryExpression { terms })
}

/// Split on `;` that are not escaped. Input is ASCII, so byte offsets are
/// character offsets.
fn split_statements(input: &str) -> Result<Vec<(usize, &str)>> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (i, b) in input.bytes().enumerate() {
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b';' {
            statements.push((start, &input[start..i]));
            start = i + 1;
        }
    }
    if escaped {
        return Err(syntax(input.len() - 1, "\\", "dangling escape at end of query"));
    }
    statements.push((start, &input[start..]));

    for &(offset, statement) in &statements {
        if statement.is_empty() {
            return Err(syntax(offset, "", "empty statement"));
        }
    }
    Ok(statements)
}

fn parse_statement(offset: usize, statement: &str) -> Result<Term> {
    let Some(attr_end) = statement.find(|c| matches!(c, '=' | '!' | '<' | '>' | '~')) else {
        return Err(syntax(offset, statement, "missing comparison operator"));
    };

    let attribute = &statement[..attr_end];
    check_attribute(attribute).map_err(|reason| syntax(offset, attribute, reason))?;

    let rest = &statement[attr_end..];
    let Some(&(symbol, operator)) = OPERATORS.iter().find(|(s, _)| rest.starts_with(*s)) else {
        let token: String = rest.chars().take(2).collect();
        return Err(syntax(offset + attr_end, token, "unknown operator"));
    };

    let value_start = attr_end + symbol.len();
    let raw = &statement[value_start..];
    let value_pos = offset + value_start;
    if raw.is_empty() {
        return Err(syntax(value_pos, statement, "missing value"));
    }

    if operator == Operator::Match {
        regex::Regex::new(raw)
            .map_err(|e| syntax(value_pos, raw, format!("invalid pattern: {}", e)))?;
        return Ok(Term::new(
            attribute,
            Operator::Match,
            Operand::Single(QueryValue::Text(raw.to_string())),
        ));
    }

    let lexemes = lex_value(raw, value_pos);

    if let Some(split) = find_range_separator(&lexemes) {
        if operator != Operator::Equal {
            return Err(syntax(
                lexemes[split].pos,
                "..",
                "range bounds are only valid with ==",
            ));
        }
        let low = parse_literal(&lexemes[..split], lexemes[split].pos)?;
        let high = parse_literal(&lexemes[split + 2..], lexemes[split + 1].pos + 1)?;
        let compatible = (low.is_numeric() && high.is_numeric())
            || matches!((&low, &high), (QueryValue::Text(_), QueryValue::Text(_)));
        if !compatible {
            return Err(syntax(
                value_pos,
                raw,
                "range bounds must both be numbers or both be text",
            ));
        }
        return Ok(Term::new(attribute, Operator::Range, Operand::Bounds(low, high)));
    }

    let items: Vec<&[Lexeme]> = lexemes.split(|l| l.c == ',' && !l.escaped).collect();
    if items.len() > 1 {
        if !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(syntax(value_pos, raw, "value lists are only valid with == and !="));
        }
        let mut values = Vec::with_capacity(items.len());
        let mut pos = value_pos;
        for item in items {
            values.push(parse_literal(item, pos)?);
            pos += item.iter().map(|l| if l.escaped { 2 } else { 1 }).sum::<usize>() + 1;
        }
        return Ok(Term::new(attribute, operator, Operand::AnyOf(values)));
    }

    let value = parse_literal(&lexemes, value_pos)?;
    if operator.is_ordering() && matches!(value, QueryValue::Bool(_)) {
        return Err(syntax(value_pos, raw, "ordering operators do not apply to booleans"));
    }
    Ok(Term::new(attribute, operator, Operand::Single(value)))
}

/// Resolve backslash escapes. Dangling escapes were rejected while splitting.
fn lex_value(raw: &str, base: usize) -> Vec<Lexeme> {
    let mut lexemes = Vec::with_capacity(raw.len());
    let mut chars = raw.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some((_, next)) = chars.next() {
                lexemes.push(Lexeme {
                    c: next,
                    escaped: true,
                    pos: base + i,
                });
            }
        } else {
            lexemes.push(Lexeme {
                c,
                escaped: false,
                pos: base + i,
            });
        }
    }
    lexemes
}

/// Index of the first unescaped `..`.
fn find_range_separator(lexemes: &[Lexeme]) -> Option<usize> {
    lexemes
        .windows(2)
        .position(|w| w.iter().all(|l| l.c == '.' && !l.escaped))
}

fn parse_literal(lexemes: &[Lexeme], pos: usize) -> Result<QueryValue> {
    let Some(first) = lexemes.first() else {
        return Err(syntax(pos, "", "empty value"));
    };

    let quoted = lexemes.len() >= 2
        && first.c == '\''
        && !first.escaped
        && lexemes.last().is_some_and(|l| l.c == '\'' && !l.escaped);
    let body = if quoted {
        &lexemes[1..lexemes.len() - 1]
    } else {
        lexemes
    };

    for l in body.iter().filter(|l| !l.escaped) {
        match l.c {
            '|' => {
                return Err(syntax(
                    l.pos,
                    "|",
                    "disjunction across attributes is not supported",
                ))
            }
            '*' | '?' | ' ' | ',' | ';' | '\'' | '\\' => {
                return Err(syntax(l.pos, l.c.to_string(), "unescaped reserved character"))
            }
            _ => {}
        }
    }

    let text: String = body.iter().map(|l| l.c).collect();
    if quoted || body.iter().any(|l| l.escaped) {
        return Ok(QueryValue::Text(text));
    }

    Ok(match text.as_str() {
        "true" => QueryValue::Bool(true),
        "false" => QueryValue::Bool(false),
        _ => parse_number(&text).unwrap_or(QueryValue::Text(text)),
    })
}

fn syntax(position: usize, token: impl Into<String>, reason: impl Into<String>) -> ClientError {
    ClientError::Syntax {
        position,
        token: token.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compile;

    fn position_of(err: ClientError) -> usize {
        match err {
            ClientError::Syntax { position, .. } => position,
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_conjunction() {
        let expr = parse("temperature>30;temperature<40").unwrap();
        assert_eq!(
            expr,
            QueryExpression::new()
                .and(Term::gt("temperature", 30))
                .and(Term::lt("temperature", 40))
        );
    }

    #[test]
    fn test_parse_values() {
        let expr = parse(r"a==1;b==2.5;c==true;d=='7';e==x\*y;f==red,green;g==1..5;h~=^a.*|b$").unwrap();
        assert_eq!(expr.terms[0].operand, Operand::Single(QueryValue::Integer(1)));
        assert_eq!(expr.terms[1].operand, Operand::Single(QueryValue::Float(2.5)));
        assert_eq!(expr.terms[2].operand, Operand::Single(QueryValue::Bool(true)));
        assert_eq!(expr.terms[3].operand, Operand::Single("7".into()));
        assert_eq!(expr.terms[4].operand, Operand::Single("x*y".into()));
        assert_eq!(
            expr.terms[5].operand,
            Operand::AnyOf(vec!["red".into(), "green".into()])
        );
        assert_eq!(expr.terms[6].operator, Operator::Range);
        assert_eq!(expr.terms[6].operand, Operand::Bounds(1.into(), 5.into()));
        assert_eq!(expr.terms[7].operator, Operator::Match);
        assert_eq!(expr.terms[7].operand, Operand::Single("^a.*|b$".into()));
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_syntax_error_positions() {
        assert_eq!(position_of(parse("a>1;;b<2").unwrap_err()), 4);
        assert_eq!(position_of(parse("a>1;temperature").unwrap_err()), 4);
        assert_eq!(position_of(parse("a>1;b=2").unwrap_err()), 5);
        assert_eq!(position_of(parse("a>1;b==x*").unwrap_err()), 8);
        assert_eq!(position_of(parse("a>1;b!=1..2").unwrap_err()), 8);
        assert_eq!(position_of(parse("a>").unwrap_err()), 2);
        assert_eq!(position_of(parse("1a>2").unwrap_err()), 0);
        assert_eq!(position_of(parse(r"a==b\").unwrap_err()), 4);
    }

    #[test]
    fn test_disjunction_across_attributes_rejected() {
        let err = parse("a==1|b==2").unwrap_err();
        match err {
            ClientError::Syntax { position, token, .. } => {
                assert_eq!(position, 4);
                assert_eq!(token, "|");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_list_with_ordering() {
        assert!(parse("a>1,2").is_err());
        assert!(parse("a>true").is_err());
        assert!(parse("a==1..x").is_err());
    }

    #[test]
    fn test_roundtrip_tricky_text() {
        let texts = [
            "", "30", "-1.5e3", "true", "a.", ".a", "a..b", "'q'", "=x", "x=y", "a b", r"back\slash",
            "semi;colon", "1,2", "e", "+5", "inf",
        ];
        for text in texts {
            for term in [Term::eq("name", text), Term::gt("name", text)] {
                let expr = QueryExpression::from(term);
                let compiled = compile(&expr).unwrap();
                assert_eq!(parse(&compiled).unwrap(), expr, "compiled form {:?}", compiled);
            }
        }
    }

    #[test]
    fn test_roundtrip_text_range() {
        let expr = QueryExpression::from(Term::between(
            "dateObserved",
            "2018-01-01T00:00:00Z",
            "2018-12-31T23:59:59Z.",
        ));
        let compiled = compile(&expr).unwrap();
        assert_eq!(parse(&compiled).unwrap(), expr);
    }
}
