//! pyformat placeholders (`%s`, `%(name)s`, `%%`)
//!
//! A query is scanned once into a [`Template`]. The template can then be
//! rendered for the server (`$1..$N` plus an ordered argument list) or for
//! the client (arguments spliced in as SQL literals).
//!
//! `%` is significant everywhere, quoted literals included, so a literal
//! percent sign in a parameterized query is written `%%`. Quotes, comments
//! and dollar-quoted bodies only matter for spotting `;` between commands
//! and server-style `$N` placeholders.
//!
//! A query executed without arguments is not pyformat at all: it is scanned
//! with [`parse_verbatim`], which keeps every `%` as written.

use crate::error::{Error, Result};
use crate::types::{Params, Value};
use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Positional,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Positional,
    Named,
}

/// A parsed query string
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    pieces: Vec<Piece>,
    style: Option<Style>,
    multi_statement: bool,
    dollar_params: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexical {
    Code,
    SingleQuote { escapes: bool },
    DoubleQuote,
    LineComment,
    BlockComment,
    DollarQuote(String),
}

/// Scan a query string for pyformat placeholders
pub fn parse(sql: &str) -> Result<Template> {
    scan(sql, true)
}

/// Scan a query that will run without arguments
///
/// `%` is plain text here, so modulo and `LIKE 'a%'` pass through untouched.
/// Only command separators and `$N` are tracked.
pub fn parse_verbatim(sql: &str) -> Result<Template> {
    scan(sql, false)
}

fn scan(sql: &str, pyformat: bool) -> Result<Template> {
    let chars: Vec<char> = sql.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut style = None;
    let mut state = Lexical::Code;
    let mut after_semicolon = false;
    let mut multi_statement = false;
    let mut dollar_params = false;

    let mut set_style = |wanted: Style| -> Result<()> {
        match style {
            Some(current) if current != wanted => {
                Err(Error::programming("argument formats can't be mixed"))
            }
            _ => {
                style = Some(wanted);
                Ok(())
            }
        }
    };

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if pyformat && c == '%' {
            match next {
                Some('%') => {
                    literal.push('%');
                    i += 2;
                }
                Some('(') => {
                    let close = chars[i + 2..]
                        .iter()
                        .position(|&ch| ch == ')')
                        .map(|p| p + i + 2)
                        .ok_or_else(|| Error::programming("incomplete placeholder: '%(' without ')'"))?;
                    let name: String = chars[i + 2..close].iter().collect();
                    set_style(Style::Named)?;
                    i = skip_conversion(&chars, close + 1)?;
                    flush(&mut pieces, &mut literal);
                    pieces.push(Piece::Named(name));
                }
                _ => {
                    set_style(Style::Positional)?;
                    i = skip_conversion(&chars, i + 1)?;
                    flush(&mut pieces, &mut literal);
                    pieces.push(Piece::Positional);
                }
            }
            continue;
        }

        literal.push(c);
        i += 1;

        match &state {
            Lexical::Code => match c {
                '\'' => {
                    let escapes = i >= 2
                        && matches!(chars[i - 2], 'e' | 'E')
                        && !(i >= 3 && is_ident_char(chars[i - 3]));
                    state = Lexical::SingleQuote { escapes };
                }
                '"' => state = Lexical::DoubleQuote,
                '-' if next == Some('-') => {
                    literal.push('-');
                    i += 1;
                    state = Lexical::LineComment;
                }
                '/' if next == Some('*') => {
                    literal.push('*');
                    i += 1;
                    state = Lexical::BlockComment;
                }
                ';' => after_semicolon = true,
                '$' => {
                    if next.map_or(false, |d| d.is_ascii_digit()) {
                        dollar_params = true;
                    } else if let Some(tag) = dollar_tag(&chars, i - 1) {
                        // copy the rest of the opening tag
                        literal.extend(tag.chars().skip(1));
                        i += tag.chars().count() - 1;
                        state = Lexical::DollarQuote(tag);
                    }
                }
                c if c.is_whitespace() => {}
                _ => {
                    if after_semicolon {
                        multi_statement = true;
                    }
                }
            },
            Lexical::SingleQuote { escapes } => {
                if *escapes && c == '\\' {
                    if let Some(escaped) = next {
                        if escaped != '%' {
                            literal.push(escaped);
                            i += 1;
                        }
                    }
                } else if c == '\'' {
                    state = Lexical::Code;
                }
            }
            Lexical::DoubleQuote => {
                if c == '"' {
                    state = Lexical::Code;
                }
            }
            Lexical::LineComment => {
                if c == '\n' {
                    state = Lexical::Code;
                }
            }
            Lexical::BlockComment => {
                if c == '*' && next == Some('/') {
                    literal.push('/');
                    i += 1;
                    state = Lexical::Code;
                }
            }
            Lexical::DollarQuote(tag) => {
                if c == '$' {
                    if let Some(closing) = dollar_tag(&chars, i - 1) {
                        if &closing == tag {
                            literal.extend(closing.chars().skip(1));
                            i += closing.chars().count() - 1;
                            state = Lexical::Code;
                        }
                    }
                }
            }
        }

        // anything past a `;` that isn't a comment starts another command
        if after_semicolon && matches!(state, Lexical::SingleQuote { .. } | Lexical::DoubleQuote | Lexical::DollarQuote(_)) {
            multi_statement = true;
        }
    }
    flush(&mut pieces, &mut literal);

    Ok(Template {
        source: sql.to_string(),
        pieces,
        style,
        multi_statement,
        dollar_params,
    })
}

fn flush(pieces: &mut Vec<Piece>, literal: &mut String) {
    if !literal.is_empty() {
        pieces.push(Piece::Literal(std::mem::take(literal)));
    }
}

/// Skip width/sign characters and the conversion letter after `%` or `%(name)`
fn skip_conversion(chars: &[char], mut i: usize) -> Result<usize> {
    while i < chars.len() && !chars[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i >= chars.len() {
        return Err(Error::programming("incomplete format"));
    }
    Ok(i + 1)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `$tag$` (or `$$`) starting at `start`
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut end = start + 1;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    if end < chars.len() && chars[end] == '$' {
        let tag: String = chars[start..=end].iter().collect();
        // `$1$` is not a tag
        if tag.chars().nth(1).map_or(true, |c| !c.is_ascii_digit()) {
            return Some(tag);
        }
    }
    None
}

impl Template {
    /// The query exactly as given
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of placeholders in the query
    pub fn placeholder_count(&self) -> usize {
        self.pieces
            .iter()
            .filter(|p| !matches!(p, Piece::Literal(_)))
            .count()
    }

    /// True when the query holds more than one SQL command
    pub fn is_multi_statement(&self) -> bool {
        self.multi_statement
    }

    /// True when the query already uses `$N` placeholders
    pub fn has_dollar_params(&self) -> bool {
        self.dollar_params
    }

    /// Rewrite to `$N` placeholders, returning the arguments in bind order
    ///
    /// A name used twice binds once.
    pub fn render_server(&self, params: &Params) -> Result<(String, Vec<Value>)> {
        if params.is_none() {
            return Ok((self.source.clone(), Vec::new()));
        }
        if self.dollar_params {
            return Err(Error::programming(
                "SQL $x parameters are not allowed in parameter queries",
            ));
        }

        let (slots, values) = self.resolve(params)?;
        let mut sql = String::with_capacity(self.source.len() + slots.len() * 2);
        let mut slots = slots.into_iter();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => sql.push_str(text),
                _ => {
                    let slot = slots.next().unwrap_or_default();
                    let _ = write!(sql, "${}", slot + 1);
                }
            }
        }
        Ok((sql, values.into_iter().cloned().collect()))
    }

    /// Splice the arguments in as SQL literals
    pub fn render_client(&self, params: &Params) -> Result<String> {
        if params.is_none() {
            return Ok(self.source.clone());
        }

        let (slots, values) = self.resolve(params)?;
        let quoted = values
            .iter()
            .map(|v| v.quoted())
            .collect::<Result<Vec<_>>>()?;

        let mut sql = String::with_capacity(self.source.len());
        let mut slots = slots.into_iter();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => sql.push_str(text),
                _ => {
                    let slot = slots.next().unwrap_or_default();
                    sql.push_str(&quoted[slot]);
                }
            }
        }
        Ok(sql)
    }

    /// For each placeholder, the index of its argument in the returned list
    fn resolve<'p>(&self, params: &'p Params) -> Result<(Vec<usize>, Vec<&'p Value>)> {
        match params {
            Params::None => Ok((Vec::new(), Vec::new())),
            Params::Positional(values) => {
                if self.style == Some(Style::Named) {
                    return Err(Error::programming(
                        "named placeholders need a mapping of arguments",
                    ));
                }
                let wanted = self.placeholder_count();
                if values.len() < wanted {
                    return Err(Error::programming("not enough arguments for format string"));
                }
                if values.len() > wanted {
                    return Err(Error::programming(
                        "not all arguments converted during string formatting",
                    ));
                }
                Ok(((0..wanted).collect(), values.iter().collect()))
            }
            Params::Named(map) => {
                if self.style == Some(Style::Positional) {
                    return Err(Error::programming(
                        "positional placeholders need a sequence of arguments",
                    ));
                }
                let mut seen: HashMap<&str, usize> = HashMap::new();
                let mut slots = Vec::new();
                let mut values = Vec::new();
                for piece in &self.pieces {
                    if let Piece::Named(name) = piece {
                        let slot = match seen.get(name.as_str()) {
                            Some(slot) => *slot,
                            None => {
                                let value = map.get(name).ok_or_else(|| {
                                    Error::programming(format!(
                                        "missing argument for placeholder %({})s",
                                        name
                                    ))
                                })?;
                                values.push(value);
                                seen.insert(name.as_str(), values.len() - 1);
                                values.len() - 1
                            }
                        };
                        slots.push(slot);
                    }
                }
                Ok((slots, values))
            }
        }
    }
}

/// Statements that cannot carry bind parameters
pub fn rejects_bind_params(sql: &str) -> bool {
    let head: String = sql
        .trim_start()
        .chars()
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    head == "comment " || head == "execute "
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn positional(values: Vec<Value>) -> Params {
        Params::Positional(values)
    }

    #[test]
    fn test_positional_to_server() {
        let t = parse("SELECT %s, %s").unwrap();
        let (sql, values) = t
            .render_server(&positional(vec![Value::Int(1), Value::from("x")]))
            .unwrap();
        assert_eq!(sql, "SELECT $1, $2");
        assert_eq!(values, vec![Value::Int(1), Value::from("x")]);
    }

    #[test]
    fn test_width_specifier_is_ignored() {
        let t = parse("SELECT %-10s, %(x)5d").unwrap_err();
        assert_eq!(t.to_string(), "argument formats can't be mixed");

        let t = parse("SELECT %-10s").unwrap();
        let (sql, _) = t.render_server(&positional(vec![Value::Int(1)])).unwrap();
        assert_eq!(sql, "SELECT $1");
    }

    #[test]
    fn test_named_reuses_slot() {
        let t = parse("SELECT %(a)s + %(b)s, %(a)s").unwrap();
        let params = Params::named([("a", 1), ("b", 2), ("unused", 3)]);
        let (sql, values) = t.render_server(&params).unwrap();
        assert_eq!(sql, "SELECT $1 + $2, $1");
        assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);

        assert_eq!(t.render_client(&params).unwrap(), "SELECT 1 + 2, 1");
    }

    #[test]
    fn test_missing_named_argument() {
        let t = parse("SELECT %(a)s").unwrap();
        let err = t.render_server(&Params::named([("b", 1)])).unwrap_err();
        assert_eq!(err.to_string(), "missing argument for placeholder %(a)s");
    }

    #[test]
    fn test_arity_errors() {
        let t = parse("SELECT %s, %s").unwrap();
        assert_eq!(
            t.render_client(&positional(vec![Value::Int(1)]))
                .unwrap_err()
                .to_string(),
            "not enough arguments for format string"
        );
        assert_eq!(
            t.render_client(&positional(vec![Value::Int(1); 3]))
                .unwrap_err()
                .to_string(),
            "not all arguments converted during string formatting"
        );
    }

    #[test]
    fn test_percent_escape() {
        let t = parse("SELECT 'a%%' || %s").unwrap();
        assert_eq!(
            t.render_client(&positional(vec![Value::from("b")])).unwrap(),
            "SELECT 'a%' || 'b'"
        );
        // no arguments: sent as written
        assert_eq!(t.render_client(&Params::None).unwrap(), "SELECT 'a%%' || %s");
    }

    #[test]
    fn test_incomplete_formats() {
        assert!(parse("SELECT 5 %").is_err());
        assert!(parse("SELECT %(name").is_err());
        assert!(parse("SELECT %(name)").is_err());
    }

    #[test]
    fn test_style_mismatch_with_params() {
        let t = parse("SELECT %(a)s").unwrap();
        assert!(t.render_server(&positional(vec![Value::Int(1)])).is_err());
        let t = parse("SELECT %s").unwrap();
        assert!(t.render_server(&Params::named([("a", 1)])).is_err());
    }

    #[test]
    fn test_multi_statement_detection() {
        assert!(parse("SELECT %s; SELECT %s").unwrap().is_multi_statement());
        assert!(parse("SELECT 1;'x'").unwrap().is_multi_statement());
        assert!(!parse("SELECT %s;").unwrap().is_multi_statement());
        assert!(!parse("SELECT %s;  \n").unwrap().is_multi_statement());
        assert!(!parse("SELECT ';' || %s").unwrap().is_multi_statement());
        assert!(!parse("SELECT 1; -- trailing").unwrap().is_multi_statement());
        assert!(!parse("SELECT 1; /* trailing */").unwrap().is_multi_statement());
        assert!(!parse("SELECT $$a;b$$").unwrap().is_multi_statement());
        assert!(!parse("SELECT $fn$ x; y $fn$").unwrap().is_multi_statement());
        assert!(!parse(r"SELECT E'it\'s; fine'").unwrap().is_multi_statement());
    }

    #[test]
    fn test_dollar_params_detection() {
        let t = parse("SELECT $1, %s").unwrap();
        assert!(t.has_dollar_params());
        assert_eq!(
            t.render_server(&positional(vec![Value::Int(1)]))
                .unwrap_err()
                .to_string(),
            "SQL $x parameters are not allowed in parameter queries"
        );
        assert!(!parse("SELECT '$1'").unwrap().has_dollar_params());
        assert!(!parse("SELECT $$ $1 $$").unwrap().has_dollar_params());
    }

    #[test]
    fn test_dollar_params_allowed_without_arguments() {
        let t = parse("PREPARE q(int) AS SELECT $1").unwrap();
        let (sql, values) = t.render_server(&Params::None).unwrap();
        assert_eq!(sql, "PREPARE q(int) AS SELECT $1");
        assert!(values.is_empty());
    }

    #[test]
    fn test_literal_text_is_preserved() {
        let sql = "SELECT \"col\", 'don''t' -- note\n/* block */ FROM t WHERE x = %s";
        let t = parse(sql).unwrap();
        assert_eq!(
            t.render_client(&positional(vec![Value::Int(5)])).unwrap(),
            "SELECT \"col\", 'don''t' -- note\n/* block */ FROM t WHERE x = 5"
        );
    }

    #[test]
    fn test_verbatim_keeps_percent_signs() {
        for sql in ["SELECT 10 % 3", "SELECT 'abc' LIKE 'a%'", "SELECT 5 %", "SELECT '%(x'"] {
            let t = parse_verbatim(sql).unwrap();
            assert_eq!(t.placeholder_count(), 0);
            assert_eq!(t.render_client(&Params::None).unwrap(), sql);
            let (rendered, values) = t.render_server(&Params::None).unwrap();
            assert_eq!(rendered, sql);
            assert!(values.is_empty());
        }
        assert!(parse("SELECT 10 % 3").is_err());
    }

    #[test]
    fn test_verbatim_still_tracks_commands() {
        assert!(parse_verbatim("SELECT 10 % 3; SELECT 1").unwrap().is_multi_statement());
        assert!(!parse_verbatim("SELECT '%;x' LIKE 'a%'").unwrap().is_multi_statement());
        assert!(parse_verbatim("SELECT $1 % 2").unwrap().has_dollar_params());
    }

    #[test]
    fn test_rejects_bind_params() {
        assert!(rejects_bind_params("EXECUTE fetch_stmt(%s)"));
        assert!(rejects_bind_params("  comment on table t is %s"));
        assert!(!rejects_bind_params("SELECT 1"));
        assert!(!rejects_bind_params("EXECUTE"));
    }

    proptest! {
        #[test]
        fn prop_server_rendering_numbers_every_placeholder(n in 1usize..40) {
            let sql = format!("SELECT {}", vec!["%s"; n].join(", "));
            let t = parse(&sql).unwrap();
            let values: Vec<Value> = (0..n as i32).map(Value::Int).collect();
            let (rendered, bound) = t.render_server(&positional(values)).unwrap();
            prop_assert_eq!(bound.len(), n);
            for i in 1..=n {
                let needle = format!("${}", i);
                prop_assert!(rendered.contains(&needle));
            }
            prop_assert!(!rendered.contains('%'));
        }

        #[test]
        fn prop_text_without_placeholders_round_trips(s in "[a-zA-Z0-9 ,;'()]*") {
            let t = parse(&s).unwrap();
            prop_assert_eq!(t.placeholder_count(), 0);
            prop_assert_eq!(t.render_client(&Params::Positional(vec![])).unwrap(), s);
        }
    }
}
