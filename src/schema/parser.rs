//! Object-literal parser for model source files.
//!
//! Understands the subset of JavaScript/TypeScript that schema declarations
//! are written in:
//!
//! ```js
//! const widgetSchema = new mongoose.Schema({
//!   name: { type: String, required: true },
//!   tags: [String],
//! }, { timestamps: true });
//! widgetSchema.index({ name: 1 }, { unique: true });
//! module.exports = mongoose.model('Widget', widgetSchema);
//! ```
//!
//! Values that are not plain literals (arrow functions, computed
//! expressions) are kept as opaque [`JsValue::Raw`] tokens rather than
//! rejected, so unknown attributes never abort a declaration.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending, one_of, satisfy},
    combinator::{map, map_res, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{pair, tuple},
};

/// A parsed JavaScript value.
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Object(Vec<(String, JsValue)>),
    Array(Vec<JsValue>),
    Str(String),
    Number(f64),
    Bool(bool),
    Null,
    /// Bare or dotted identifier, e.g. `String` or `Schema.Types.ObjectId`.
    Path(String),
    /// Call expression, kept as source text, e.g. `Date.now()`.
    Call(String),
    /// Any other expression, kept as trimmed source text.
    Raw(String),
}

impl JsValue {
    /// Look up a key of an object value.
    pub fn get(&self, key: &str) -> Option<&JsValue> {
        match self {
            JsValue::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Source-like text of an expression value.
    pub fn expression_text(&self) -> Option<&str> {
        match self {
            JsValue::Path(s) | JsValue::Call(s) | JsValue::Raw(s) => Some(s),
            _ => None,
        }
    }
}

/// A `new Schema(fields, options)` declaration.
#[derive(Debug, Clone)]
pub struct SchemaDecl {
    /// Variable the schema is assigned to, if any.
    pub binding: Option<String>,
    pub fields: Vec<(String, JsValue)>,
    pub options: Vec<(String, JsValue)>,
    pub line: usize,
}

/// A `<binding>.index(fields, options)` call.
#[derive(Debug, Clone)]
pub struct IndexDecl {
    pub binding: String,
    pub fields: Vec<(String, JsValue)>,
    pub options: Vec<(String, JsValue)>,
}

/// A `model('Name', binding)` call.
#[derive(Debug, Clone)]
pub struct ModelDecl {
    pub name: String,
    pub binding: Option<String>,
}

/// Everything found in one source file.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub schemas: Vec<SchemaDecl>,
    pub indexes: Vec<IndexDecl>,
    pub models: Vec<ModelDecl>,
    /// Declarations that were located but could not be parsed.
    pub errors: Vec<DeclError>,
}

/// A declaration that was found but could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclError {
    pub line: usize,
    /// Schema variable the declaration belongs to, when known.
    pub binding: Option<String>,
    pub message: String,
}

impl std::fmt::Display for DeclError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Scan a source file for schema, index and model declarations.
pub fn parse_source(text: &str) -> ParsedSource {
    let clean = blank_comments(text);
    let mut parsed = ParsedSource::default();

    for start in find_calls(&clean, "Schema") {
        let line = line_of(&clean, start.name_at);
        let Some(prefix) = before_new(&clean[..start.name_at]) else {
            continue;
        };
        let binding = assignment_target(prefix);
        match schema_args(&clean[start.args_at..]) {
            Ok((_, (fields, options))) => parsed.schemas.push(SchemaDecl {
                binding,
                fields,
                options: options.unwrap_or_default(),
                line,
            }),
            Err(_) => parsed.errors.push(DeclError {
                line,
                binding,
                message: "cannot parse schema field block".to_string(),
            }),
        }
    }

    for start in find_calls(&clean, "index") {
        let Some(binding) = member_receiver(&clean[..start.name_at]) else {
            continue;
        };
        match schema_args(&clean[start.args_at..]) {
            Ok((_, (fields, options))) => parsed.indexes.push(IndexDecl {
                binding,
                fields,
                options: options.unwrap_or_default(),
            }),
            Err(_) => parsed.errors.push(DeclError {
                line: line_of(&clean, start.name_at),
                binding: Some(binding),
                message: "cannot parse index declaration".to_string(),
            }),
        }
    }

    for start in find_calls(&clean, "model") {
        if let Ok((_, model)) = model_args(&clean[start.args_at..]) {
            parsed.models.push(model);
        }
    }

    parsed
}

// ---------------------------------------------------------------------------
// Declaration scanning
// ---------------------------------------------------------------------------

struct CallSite {
    /// Byte offset of the callee name.
    name_at: usize,
    /// Byte offset just past the opening parenthesis.
    args_at: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Find `name(` and `name<Generic>(` call sites at identifier boundaries.
fn find_calls(text: &str, name: &str) -> Vec<CallSite> {
    let mut sites = Vec::new();
    for (at, _) in text.match_indices(name) {
        let before_ok = text[..at].chars().next_back().is_none_or(|c| !is_ident_char(c));
        let rest = &text[at + name.len()..];
        if !before_ok || rest.chars().next().is_some_and(is_ident_char) {
            continue;
        }
        let mut rest = rest.trim_start();
        if rest.starts_with('<') {
            match skip_generics(rest) {
                Some(after) => rest = after.trim_start(),
                None => continue,
            }
        }
        if let Some(args) = rest.strip_prefix('(') {
            sites.push(CallSite {
                name_at: at,
                args_at: text.len() - args.len(),
            });
        }
    }
    sites
}

fn skip_generics(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[i + 1..]);
                }
            }
            '(' | ')' | ';' | '{' | '}' => return None,
            _ => {}
        }
    }
    None
}

/// Text preceding the `new` keyword of `new [ns.]Schema`, if there is one.
fn before_new(before: &str) -> Option<&str> {
    let mut before = before.trim_end();
    while let Some(rest) = before.strip_suffix('.') {
        before = rest.trim_end().trim_end_matches(is_ident_char).trim_end();
    }
    let rest = before.strip_suffix("new")?;
    if rest.chars().next_back().is_some_and(is_ident_char) {
        return None;
    }
    Some(rest)
}

/// Variable assigned by `[const|let|var] name = new ...`.
fn assignment_target(before_new: &str) -> Option<String> {
    let before = before_new.trim_end().strip_suffix('=')?;
    if before.ends_with(['=', '!', '<', '>']) {
        return None;
    }
    let before = before.trim_end();
    // TypeScript annotation: `const s: Schema<T> = new Schema(...)`
    let before = match before.rfind(':') {
        Some(colon) if !before[colon..].contains(['\n', ';', '{', '}', ',']) => {
            before[..colon].trim_end()
        }
        _ => before,
    };
    trailing_identifier(before)
}

fn trailing_identifier(text: &str) -> Option<String> {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_ident_char(*c))
        .last()
        .map(|(i, _)| i)?;
    Some(text[start..].to_string())
}

/// Receiver of a `receiver.index(` member call.
fn member_receiver(before: &str) -> Option<String> {
    trailing_identifier(before.trim_end().strip_suffix('.')?.trim_end())
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Replace comments with spaces, keeping byte offsets and string literals intact.
fn blank_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if quote.is_none() && (rest.starts_with("//") || rest.starts_with("/*")) {
            let end = if rest.starts_with("//") {
                rest.find('\n').unwrap_or(rest.len())
            } else {
                rest[2..].find("*/").map_or(rest.len(), |n| n + 4)
            };
            out.extend(
                rest[..end]
                    .bytes()
                    .map(|b| if b == b'\n' { '\n' } else { ' ' }),
            );
            rest = &rest[end..];
            continue;
        }
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') => quote = Some(c),
            None => {}
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

type Entries = Vec<(String, JsValue)>;

/// `{fields} [, {options}] [,] )`
fn schema_args(input: &str) -> IResult<&str, (Entries, Option<Entries>)> {
    let (input, _) = ws(input)?;
    let (input, fields) = object(input)?;
    let (input, _) = ws(input)?;
    let (input, options) = opt(map(tuple((char(','), ws, object)), |(_, _, o)| o))(input)?;
    Ok((input, (fields, options)))
}

/// `'Name' [, binding]`
fn model_args(input: &str) -> IResult<&str, ModelDecl> {
    let (input, _) = ws(input)?;
    let (input, name) = string_literal(input)?;
    let (input, _) = ws(input)?;
    let (input, binding) = opt(map(tuple((char(','), ws, identifier)), |(_, _, b)| {
        b.to_string()
    }))(input)?;
    Ok((input, ModelDecl { name, binding }))
}

// ---------------------------------------------------------------------------
// Value grammar
// ---------------------------------------------------------------------------

/// Whitespace and comments.
pub fn ws(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(tag("//"), not_line_ending)),
            value((), tuple((tag("/*"), take_until("*/"), tag("*/")))),
        ))),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_' || c == '$'),
        take_while(is_ident_char),
    ))(input)
}

fn dotted_path(input: &str) -> IResult<&str, &str> {
    recognize(pair(identifier, many0(pair(char('.'), identifier))))(input)
}

fn number_text(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)
}

fn number(input: &str) -> IResult<&str, f64> {
    map_res(number_text, str::parse::<f64>)(input)
}

/// Single, double or backtick quoted string with escapes resolved.
pub fn string_literal(input: &str) -> IResult<&str, String> {
    let (rest, quote) = one_of("'\"`")(input)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Ok((&rest[i + c.len_utf8()..], out));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            }
            continue;
        }
        out.push(c);
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

/// Content between balanced delimiters, string-aware. Input starts after `open`.
fn balanced(open: char, close: char) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input: &str| {
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for (i, c) in input.char_indices() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' | '`' => quote = Some(c),
                c if c == open => depth += 1,
                c if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok((&input[i + 1..], &input[..i]));
                    }
                }
                _ => {}
            }
        }
        Err(nom::Err::Error(Error::new(input, ErrorKind::TakeUntil)))
    }
}

/// Path, keyword literal, or call expression.
fn path_or_call(input: &str) -> IResult<&str, JsValue> {
    let (rest, path) = dotted_path(input)?;
    match path {
        "true" => return Ok((rest, JsValue::Bool(true))),
        "false" => return Ok((rest, JsValue::Bool(false))),
        "null" | "undefined" => return Ok((rest, JsValue::Null)),
        "new" | "function" | "async" => {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }
        _ => {}
    }
    let (after_ws, _) = ws(rest)?;
    if let Some(args) = after_ws.strip_prefix('(') {
        let (after, inner) = balanced('(', ')')(args)?;
        return Ok((after, JsValue::Call(format!("{}({})", path, inner.trim()))));
    }
    Ok((rest, JsValue::Path(path.to_string())))
}

/// Any expression up to the next top-level `,` or closing delimiter.
fn raw_expression(input: &str) -> IResult<&str, JsValue> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut end = input.len();
    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth == 0 => {
                end = i;
                break;
            }
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    let text = input[..end].trim();
    if text.is_empty() {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::TakeWhile1)));
    }
    Ok((&input[end..], JsValue::Raw(text.to_string())))
}

fn simple_value(input: &str) -> IResult<&str, JsValue> {
    alt((
        map(object, JsValue::Object),
        map(array, JsValue::Array),
        map(string_literal, JsValue::Str),
        map(number, JsValue::Number),
        path_or_call,
    ))(input)
}

/// A value followed by a delimiter; anything else falls back to a raw token.
pub fn js_value(input: &str) -> IResult<&str, JsValue> {
    let (input, _) = ws(input)?;
    if let Ok((rest, parsed)) = simple_value(input) {
        let (after, _) = ws(rest)?;
        if after.is_empty() || after.starts_with([',', '}', ']', ')']) {
            return Ok((rest, parsed));
        }
    }
    raw_expression(input)
}

fn property_key(input: &str) -> IResult<&str, String> {
    alt((
        string_literal,
        map(take_while1(is_ident_char), str::to_string),
        map(number_text, str::to_string),
    ))(input)
}

/// `{ key: value, shorthand, ...spread, method() {} }`
pub fn object(input: &str) -> IResult<&str, Entries> {
    let (mut input, _) = char('{')(input)?;
    let mut entries = Vec::new();
    loop {
        let (i, _) = ws(input)?;
        if let Some(rest) = i.strip_prefix('}') {
            return Ok((rest, entries));
        }
        let i = if let Some(spread) = i.strip_prefix("...") {
            js_value(spread)?.0
        } else {
            let (i, key) = property_key(i)?;
            let (i, _) = ws(i)?;
            if let Some(after_colon) = i.strip_prefix(':') {
                let (i, val) = js_value(after_colon)?;
                entries.push((key, val));
                i
            } else if i.starts_with('(') {
                let (i, body) = raw_expression(i)?;
                entries.push((key, body));
                i
            } else {
                entries.push((key.clone(), JsValue::Path(key)));
                i
            }
        };
        let (i, _) = ws(i)?;
        if let Some(rest) = i.strip_prefix(',') {
            input = rest;
        } else if let Some(rest) = i.strip_prefix('}') {
            return Ok((rest, entries));
        } else {
            return Err(nom::Err::Error(Error::new(i, ErrorKind::Char)));
        }
    }
}

/// `[a, b, c]`, trailing comma allowed.
pub fn array(input: &str) -> IResult<&str, Vec<JsValue>> {
    let (mut input, _) = char('[')(input)?;
    let mut items = Vec::new();
    loop {
        let (i, _) = ws(input)?;
        if let Some(rest) = i.strip_prefix(']') {
            return Ok((rest, items));
        }
        let (i, item) = js_value(i)?;
        items.push(item);
        let (i, _) = ws(i)?;
        if let Some(rest) = i.strip_prefix(',') {
            input = rest;
        } else if let Some(rest) = i.strip_prefix(']') {
            return Ok((rest, items));
        } else {
            return Err(nom::Err::Error(Error::new(i, ErrorKind::Char)));
        }
    }
}
