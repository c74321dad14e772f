use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, take_while1},
    character::complete::{char, digit1},
    combinator::{opt, recognize},
    multi::many0_count,
    sequence::pair,
};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::LazyLock;

use crate::{Error, ParseError, ParseErrorKind};

/// Characters that end an identifier in addition to control characters and space.
pub const TERMINATORS: &str = "()\";,@'.";

/// Reserved words of the language, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Import,
    Defun,
    Lambda,
    New,
    Set,
    LetStar,
    Block,
    Loop,
    Break,
    List,
    Cons,
    Eq,
    Elt,
    Quote,
    Nil,
    True,
    False,
    If,
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    And,
    Or,
    Not,
}

impl Keyword {
    pub const ALL: [Keyword; 29] = [
        Keyword::Import,
        Keyword::Defun,
        Keyword::Lambda,
        Keyword::New,
        Keyword::Set,
        Keyword::LetStar,
        Keyword::Block,
        Keyword::Loop,
        Keyword::Break,
        Keyword::List,
        Keyword::Cons,
        Keyword::Eq,
        Keyword::Elt,
        Keyword::Quote,
        Keyword::Nil,
        Keyword::True,
        Keyword::False,
        Keyword::If,
        Keyword::Add,
        Keyword::Subtract,
        Keyword::Multiply,
        Keyword::Divide,
        Keyword::Equal,
        Keyword::NotEqual,
        Keyword::GreaterThan,
        Keyword::LessThan,
        Keyword::And,
        Keyword::Or,
        Keyword::Not,
    ];

    /// Canonical (lowercase) spelling.
    pub fn name(self) -> &'static str {
        match self {
            Keyword::Import => "import",
            Keyword::Defun => "defun",
            Keyword::Lambda => "lambda",
            Keyword::New => "new",
            Keyword::Set => "set",
            Keyword::LetStar => "let*",
            Keyword::Block => "block",
            Keyword::Loop => "loop",
            Keyword::Break => "break",
            Keyword::List => "list",
            Keyword::Cons => "cons",
            Keyword::Eq => "eq",
            Keyword::Elt => "elt",
            Keyword::Quote => "quote",
            Keyword::Nil => "nil",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::If => "if",
            Keyword::Add => "+",
            Keyword::Subtract => "-",
            Keyword::Multiply => "*",
            Keyword::Divide => "/",
            Keyword::Equal => "=",
            Keyword::NotEqual => "!=",
            Keyword::GreaterThan => ">",
            Keyword::LessThan => "<",
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
        }
    }

    /// Look up a keyword by name, ignoring case.
    pub fn lookup(name: &str) -> Option<Keyword> {
        KEYWORDS.get(name.to_lowercase().as_str()).copied()
    }

    /// `nil`, `true` and `false` are keywords to the lexer but constants to the parser.
    pub fn is_literal(self) -> bool {
        matches!(self, Keyword::Nil | Keyword::True | Keyword::False)
    }
}

static KEYWORDS: LazyLock<HashMap<&'static str, Keyword>> =
    LazyLock::new(|| Keyword::ALL.iter().map(|k| (k.name(), *k)).collect());

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// An ordinary identifier, original casing preserved
    Id(String),
    /// A reserved word together with its spelling in the source
    Keyword(Keyword, String),
    Number(i64),
    String(String),
    Paren,
    CloseParen,
    Quote,
    Dot,
    Eof,
}

impl Token {
    /// The name carried by identifier and keyword tokens.
    pub fn name(&self) -> Option<&str> {
        match self {
            Token::Id(name) | Token::Keyword(_, name) => Some(name),
            _ => None,
        }
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match self {
            Token::Keyword(kw, _) => Some(*kw),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Id(name) | Token::Keyword(_, name) => write!(f, "{name}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::String(s) => write!(f, "{s:?}"),
            Token::Paren => write!(f, "("),
            Token::CloseParen => write!(f, ")"),
            Token::Quote => write!(f, "'"),
            Token::Dot => write!(f, "."),
            Token::Eof => write!(f, "<EOF>"),
        }
    }
}

fn is_identifier_char(c: char) -> bool {
    (c as u32) >= 33 && !TERMINATORS.contains(c)
}

/// Whitespace (any character below `!`) and `;` line comments.
fn trivia(input: &str) -> IResult<&str, usize> {
    many0_count(alt((
        take_while1(|c: char| (c as u32) < 33),
        recognize(pair(char(';'), opt(is_not("\n")))),
    )))
    .parse(input)
}

/// Decimal digits with an optional leading `-` glued to them.
fn number(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(char('-')), digit1)).parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(is_identifier_char).parse(input)
}

/// Converts source text into tokens on demand.
///
/// The lexer holds at most one token of lookahead: a token handed back with
/// [`Lexer::put_token`] is returned by the next [`Lexer::get_token`].
#[derive(Debug)]
pub struct Lexer {
    source: String,
    pos: usize,
    token_start: usize,
    put_back: Option<(Token, usize)>,
}

impl Lexer {
    pub fn new(source: impl Into<String>) -> Self {
        Lexer {
            source: source.into(),
            pos: 0,
            token_start: 0,
            put_back: None,
        }
    }

    /// Read the whole character stream up front and lex from it.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, Error> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        Ok(Self::new(source))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Byte offset where the most recently returned token starts.
    pub fn offset(&self) -> usize {
        self.token_start
    }

    pub fn get_token(&mut self) -> Result<Token, Error> {
        if let Some((token, start)) = self.put_back.take() {
            self.token_start = start;
            return Ok(token);
        }
        self.scan()
    }

    /// Push one token back.
    ///
    /// # Panics
    ///
    /// Panics if a token is already waiting in the put-back slot.
    pub fn put_token(&mut self, token: Token) {
        assert!(
            self.put_back.is_none(),
            "Lexer::put_token called twice without an intervening get_token"
        );
        self.put_back = Some((token, self.token_start));
    }

    /// Build a parse error pointing at `offset` in this lexer's source.
    pub fn error_at(
        &self,
        kind: ParseErrorKind,
        message: impl Into<String>,
        offset: usize,
        found: Option<String>,
    ) -> Error {
        Error::ParseError(ParseError::with_context_and_found(
            kind,
            message,
            &self.source,
            offset,
            found,
        ))
    }

    fn scan(&mut self) -> Result<Token, Error> {
        let rest = &self.source[self.pos..];
        let after_trivia = match trivia(rest) {
            Ok((remaining, _)) => remaining,
            Err(_) => rest,
        };
        self.pos += rest.len() - after_trivia.len();
        self.token_start = self.pos;

        let input = &self.source[self.pos..];
        let Some(first) = input.chars().next() else {
            return Ok(Token::Eof);
        };

        let simple = match first {
            '(' => Some(Token::Paren),
            ')' => Some(Token::CloseParen),
            '\'' => Some(Token::Quote),
            '.' => Some(Token::Dot),
            _ => None,
        };
        if let Some(token) = simple {
            self.pos += 1;
            return Ok(token);
        }

        if first == '"' {
            return self.scan_string();
        }

        if let Ok((remaining, digits)) = number(input) {
            let consumed = input.len() - remaining.len();
            let value = digits.parse::<i64>().map_err(|_| {
                self.error_at(
                    ParseErrorKind::ImplementationLimit,
                    "Integer literal out of range",
                    self.pos,
                    Some(digits.to_string()),
                )
            })?;
            self.pos += consumed;
            return Ok(Token::Number(value));
        }

        if let Ok((remaining, name)) = identifier(input) {
            let consumed = input.len() - remaining.len();
            let token = match name.strip_prefix('\\') {
                Some(escaped) if !escaped.is_empty() => Token::Id(escaped.to_string()),
                _ => match Keyword::lookup(name) {
                    Some(kw) => Token::Keyword(kw, name.to_string()),
                    None => Token::Id(name.to_string()),
                },
            };
            self.pos += consumed;
            return Ok(token);
        }

        Err(self.error_at(
            ParseErrorKind::InvalidSyntax,
            format!("Unexpected character '{first}'"),
            self.pos,
            Some(first.to_string()),
        ))
    }

    fn scan_string(&mut self) -> Result<Token, Error> {
        let start = self.pos;
        let mut chars = self.source[start + 1..].char_indices();
        let mut text = String::new();

        loop {
            match chars.next() {
                Some((i, '"')) => {
                    self.pos = start + 1 + i + 1;
                    return Ok(Token::String(text));
                }
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, 'r')) => text.push('\r'),
                    Some((_, '"')) => text.push('"'),
                    Some((_, '\\')) => text.push('\\'),
                    Some((i, other)) => {
                        return Err(self.error_at(
                            ParseErrorKind::InvalidSyntax,
                            format!("Unknown escape sequence '\\{other}' in string"),
                            start + 1 + i,
                            Some(format!("\\{other}")),
                        ));
                    }
                    None => break,
                },
                Some((i, '\n')) => {
                    return Err(self.error_at(
                        ParseErrorKind::Incomplete,
                        "Unterminated string: newline before closing quote",
                        start + 1 + i,
                        None,
                    ));
                }
                Some((_, c)) => text.push(c),
                None => break,
            }
        }

        Err(self.error_at(
            ParseErrorKind::Incomplete,
            "Unterminated string: end of input before closing quote",
            start,
            None,
        ))
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex_all(source: &str) -> Result<Vec<Token>, Error> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.get_token()?;
            if token == Token::Eof {
                return Ok(tokens);
            }
            tokens.push(token);
        }
    }

    fn id(name: &str) -> Token {
        Token::Id(name.into())
    }

    fn kw(keyword: Keyword, spelling: &str) -> Token {
        Token::Keyword(keyword, spelling.into())
    }

    #[test]
    fn test_lex_forms() {
        use Token::*;
        let test_cases = vec![
            (
                "(defun add (a b) (+ a b))",
                vec![
                    Paren,
                    kw(crate::lexer::Keyword::Defun, "defun"),
                    id("add"),
                    Paren,
                    id("a"),
                    id("b"),
                    CloseParen,
                    Paren,
                    kw(crate::lexer::Keyword::Add, "+"),
                    id("a"),
                    id("b"),
                    CloseParen,
                    CloseParen,
                ],
            ),
            (
                "obj.member.(call 1)",
                vec![
                    id("obj"),
                    Dot,
                    id("member"),
                    Dot,
                    Paren,
                    id("call"),
                    Number(1),
                    CloseParen,
                ],
            ),
            ("'(a \"b\")", vec![Quote, Paren, id("a"), String("b".into()), CloseParen]),
            ("; just a comment\n  42 ; trailing", vec![Number(42)]),
            ("(- 5 3)", vec![Paren, kw(crate::lexer::Keyword::Subtract, "-"), Number(5), Number(3), CloseParen]),
            ("(- -5)", vec![Paren, kw(crate::lexer::Keyword::Subtract, "-"), Number(-5), CloseParen]),
            ("-x", vec![id("-x")]),
            ("12abc", vec![Number(12), id("abc")]),
            ("LET* Let", vec![kw(crate::lexer::Keyword::LetStar, "LET*"), id("Let")]),
            ("!= < >", vec![
                kw(crate::lexer::Keyword::NotEqual, "!="),
                kw(crate::lexer::Keyword::LessThan, "<"),
                kw(crate::lexer::Keyword::GreaterThan, ">"),
            ]),
            ("\\if \\Defun", vec![id("if"), id("Defun")]),
            ("NIL True false", vec![
                kw(crate::lexer::Keyword::Nil, "NIL"),
                kw(crate::lexer::Keyword::True, "True"),
                kw(crate::lexer::Keyword::False, "false"),
            ]),
            ("", vec![]),
            ("   \t\r\n ", vec![]),
        ];

        for (source, expected) in test_cases {
            assert_eq!(lex_all(source).unwrap(), expected, "lexing {source:?}");
        }
    }

    #[test]
    fn test_lex_strings() {
        let test_cases = vec![
            (r#""hello""#, Ok("hello")),
            (r#""a\nb\tc\rd""#, Ok("a\nb\tc\rd")),
            (r#""quote \" and backslash \\""#, Ok("quote \" and backslash \\")),
            (r#""""#, Ok("")),
            (r#""unterminated"#, Err("end of input")),
            ("\"raw\nnewline\"", Err("newline before closing quote")),
            (r#""bad \q escape""#, Err("Unknown escape")),
            (r#""dangling \"#, Err("end of input")),
        ];

        for (source, expected) in test_cases {
            match (lex_all(source), expected) {
                (Ok(tokens), Ok(text)) => {
                    assert_eq!(tokens, vec![Token::String(text.into())], "lexing {source:?}");
                }
                (Err(err), Err(fragment)) => {
                    let msg = err.to_string();
                    assert!(msg.contains(fragment), "{source:?}: expected '{fragment}' in {msg}");
                }
                (got, want) => panic!("{source:?}: expected {want:?}, got {got:?}"),
            }
        }
    }

    #[test]
    fn test_lex_errors() {
        let err = lex_all("(a , b)").unwrap_err();
        assert!(err.to_string().contains("Unexpected character ','"));

        let err = lex_all("99999999999999999999").unwrap_err();
        match err {
            Error::ParseError(e) => assert_eq!(e.kind, ParseErrorKind::ImplementationLimit),
            other => panic!("unexpected error {other:?}"),
        }

        let err = lex_all("\"open").unwrap_err();
        match err {
            Error::ParseError(e) => assert_eq!(e.kind, ParseErrorKind::Incomplete),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_put_back_round_trip() {
        let source = "(import system.math) 'x \"s\" -12 (if a b)";
        let mut lexer = Lexer::new(source);
        loop {
            let token = lexer.get_token().unwrap();
            let offset = lexer.offset();
            lexer.put_token(token.clone());
            assert_eq!(lexer.get_token().unwrap(), token);
            assert_eq!(lexer.offset(), offset);
            if token == Token::Eof {
                break;
            }
        }
    }

    #[test]
    #[should_panic(expected = "put_token called twice")]
    fn test_double_put_back_panics() {
        let mut lexer = Lexer::new("a b");
        let a = lexer.get_token().unwrap();
        let b = lexer.get_token().unwrap();
        lexer.put_token(b);
        lexer.put_token(a);
    }

    #[test]
    fn test_identifiers_keep_their_casing() {
        let names = [
            "foo", "Foo", "FOO", "x1", "hello-world", "a->b", "*star*", "nilly", "Let", "lambda2",
            "set!", "list?", "+x", "a*b", "λ",
        ];
        for name in names {
            assert!(Keyword::lookup(name).is_none(), "{name} should not be a keyword");
            assert_eq!(lex_all(name).unwrap(), vec![id(name)], "lexing {name}");
        }
    }

    #[test]
    fn test_integers() {
        let values = (0..5_000i64).step_by(37).chain([i64::MAX, 1_000_000_007]);
        for n in values {
            assert_eq!(lex_all(&n.to_string()).unwrap(), vec![Token::Number(n)]);
            if n > 0 {
                assert_eq!(lex_all(&format!("-{n}")).unwrap(), vec![Token::Number(-n)]);
            }
        }
    }

    #[test]
    fn test_keywords_match_case_insensitively() {
        for keyword in Keyword::ALL {
            let upper = keyword.name().to_uppercase();
            assert_eq!(Keyword::lookup(&upper), Some(keyword));
            assert_eq!(lex_all(&upper).unwrap(), vec![kw(keyword, &upper)]);
        }
    }

    #[test]
    fn test_offsets_point_at_token_start() {
        let mut lexer = Lexer::new("  (foo\n  bar)");
        assert_eq!(lexer.get_token().unwrap(), Token::Paren);
        assert_eq!(lexer.offset(), 2);
        assert_eq!(lexer.get_token().unwrap(), id("foo"));
        assert_eq!(lexer.offset(), 3);
        assert_eq!(lexer.get_token().unwrap(), id("bar"));
        assert_eq!(lexer.offset(), 9);
    }
}
