//! Lexical relation analysis.
//!
//! Live queries are invalidated by relation name: a mutation reports the
//! tables it touched and every live query reading one of them re-runs. This
//! module extracts relation names from SQL text without a full parser. The
//! scan is deliberately conservative. It may report names that are not
//! relations (CTE names, for instance) but never misses a table that
//! appears after `FROM`, `JOIN`, `INTO` or `UPDATE`.
//!
//! Views are not expanded here; engines that know their catalog resolve
//! them in [`Engine::dependencies`](crate::engine::Engine::dependencies).

use crate::engine::Touched;
use std::collections::BTreeSet;

/// Set of relations a query depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationSet {
    /// Exactly these relations (lowercase, unqualified)
    Known(BTreeSet<String>),
    /// Dependencies could not be determined; any mutation invalidates
    Unknown,
}

impl RelationSet {
    pub fn empty() -> Self {
        RelationSet::Known(BTreeSet::new())
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        RelationSet::Known(
            names
                .into_iter()
                .map(|n| normalize_relation(n.as_ref()))
                .collect(),
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, RelationSet::Unknown)
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            RelationSet::Known(set) => set.contains(&normalize_relation(name)),
            RelationSet::Unknown => true,
        }
    }

    /// Merge another set into this one. `Unknown` absorbs everything.
    pub fn union(self, other: RelationSet) -> RelationSet {
        match (self, other) {
            (RelationSet::Known(mut a), RelationSet::Known(b)) => {
                a.extend(b);
                RelationSet::Known(a)
            }
            _ => RelationSet::Unknown,
        }
    }

    /// Whether a statement that touched `touched` can change the result of
    /// a query depending on this set.
    pub fn is_affected_by(&self, touched: &Touched) -> bool {
        match (self, touched) {
            (_, Touched::Nothing) => false,
            (_, Touched::Everything) => true,
            (RelationSet::Unknown, Touched::Relations(_)) => true,
            (RelationSet::Known(deps), Touched::Relations(names)) => !deps.is_disjoint(names),
        }
    }
}

/// Lowercase, unquoted, schema-stripped relation name.
pub fn normalize_relation(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    unquote(last.trim()).to_ascii_lowercase()
}

fn unquote(ident: &str) -> &str {
    let bytes = ident.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"')
            || (first == b'`' && last == b'`')
            || (first == b'[' && last == b']')
        {
            return &ident[1..ident.len() - 1];
        }
    }
    ident
}

/// Coarse statement classification used for touched-relation reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT, VALUES, or a WITH clause leading to a SELECT
    Read,
    /// INSERT, UPDATE, DELETE, REPLACE (possibly behind a WITH clause)
    Write,
    /// DDL, transaction control, PRAGMA and anything unrecognized
    Other,
}

/// Classify a statement by its leading keyword.
pub fn classify(sql: &str) -> StatementKind {
    let tokens = tokenize(sql);
    let Some(first) = tokens.iter().find_map(Token::word) else {
        return StatementKind::Other;
    };
    match first.as_str() {
        "SELECT" | "VALUES" => StatementKind::Read,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => StatementKind::Write,
        "WITH" => {
            let writes = tokens.iter().filter_map(Token::word).any(|w| {
                matches!(w.as_str(), "INSERT" | "UPDATE" | "DELETE" | "REPLACE")
            });
            if writes {
                StatementKind::Write
            } else {
                StatementKind::Read
            }
        }
        _ => StatementKind::Other,
    }
}

/// Relations referenced by a statement.
///
/// Returns `Unknown` when a relation-introducing keyword is followed by
/// something the scan cannot interpret as a name.
pub fn referenced_relations(sql: &str) -> RelationSet {
    let tokens = tokenize(sql);
    let mut names = BTreeSet::new();
    let mut i = 0;

    while i < tokens.len() {
        let keyword = tokens[i].word();
        let introduces = matches!(
            keyword.as_deref(),
            Some("FROM" | "JOIN" | "INTO" | "UPDATE")
        );
        // INTO t (a, b) is a column list, not a call
        let allows_call = keyword.as_deref() != Some("INTO");
        i += 1;
        if !introduces {
            continue;
        }
        // UPDATE OR REPLACE t: skip the conflict clause
        if keyword.as_deref() == Some("UPDATE")
            && tokens.get(i).and_then(Token::word).as_deref() == Some("OR")
        {
            i += 2;
        }

        // A FROM list may name several relations separated by commas.
        loop {
            match tokens.get(i) {
                Some(Token::Punct('(')) => break,
                Some(Token::Ident(_)) | Some(Token::Quoted(_)) => {}
                _ => return RelationSet::Unknown,
            }
            let Some((name, next)) = qualified_name(&tokens, i) else {
                return RelationSet::Unknown;
            };
            i = next;
            // name(...) is a table-valued function, not a relation
            if !(allows_call && matches!(tokens.get(i), Some(Token::Punct('(')))) {
                names.insert(normalize_relation(&name));
            }
            i = skip_alias(&tokens, i);
            if matches!(tokens.get(i), Some(Token::Punct(','))) {
                i += 1;
                continue;
            }
            break;
        }
    }

    RelationSet::Known(names)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    Punct(char),
    Literal,
}

impl Token {
    /// Uppercased bare word, if this token is one.
    fn word(&self) -> Option<String> {
        match self {
            Token::Ident(s) => Some(s.to_ascii_uppercase()),
            _ => None,
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            Token::Ident(s) | Token::Quoted(s) => Some(s),
            _ => None,
        }
    }
}

/// Keywords that may follow a relation name and must not be read as an alias.
const CLAUSE_WORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "LIMIT", "HAVING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL",
    "CROSS", "NATURAL", "OUTER", "ON", "USING", "UNION", "EXCEPT", "INTERSECT", "SET", "VALUES",
    "SELECT", "DEFAULT", "RETURNING", "WINDOW", "INDEXED", "NOT", "AS", "DO", "WHEN", "OFFSET",
];

fn qualified_name(tokens: &[Token], start: usize) -> Option<(String, usize)> {
    let mut name = tokens.get(start)?.name()?.to_string();
    let mut i = start + 1;
    while matches!(tokens.get(i), Some(Token::Punct('.'))) {
        name = tokens.get(i + 1)?.name()?.to_string();
        i += 2;
    }
    Some((name, i))
}

fn skip_alias(tokens: &[Token], mut i: usize) -> usize {
    if tokens.get(i).and_then(Token::word).as_deref() == Some("AS") {
        i += 1;
        if tokens.get(i).and_then(Token::name).is_some() {
            i += 1;
        }
        return i;
    }
    match tokens.get(i) {
        Some(Token::Ident(w)) if !CLAUSE_WORDS.contains(&w.to_ascii_uppercase().as_str()) => i + 1,
        Some(Token::Quoted(_)) => i + 1,
        _ => i,
    }
}

fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
        } else if c == '\'' {
            i = skip_delimited(&chars, i, '\'').1;
            tokens.push(Token::Literal);
        } else if c == '"' || c == '`' {
            let (text, next) = skip_delimited(&chars, i, c);
            tokens.push(Token::Quoted(text));
            i = next;
        } else if c == '[' {
            let start = i + 1;
            while i < chars.len() && chars[i] != ']' {
                i += 1;
            }
            tokens.push(Token::Quoted(chars[start..i.min(chars.len())].iter().collect()));
            i += 1;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Literal);
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }

    tokens
}

/// Read a quoted run starting at `start`, honouring doubled delimiters.
/// Returns the unescaped text and the index after the closing delimiter.
fn skip_delimited(chars: &[char], start: usize, delim: char) -> (String, usize) {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == delim {
            if chars.get(i + 1) == Some(&delim) {
                text.push(delim);
                i += 2;
                continue;
            }
            return (text, i + 1);
        }
        text.push(chars[i]);
        i += 1;
    }
    (text, i)
}
