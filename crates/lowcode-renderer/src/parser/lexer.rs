use super::{ParseError, Spanned};
use chumsky::prelude::*;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'code> {
    ParenOpen,
    ParenClose,
    BraceOpen,
    BraceClose,
    BracketOpen,
    BracketClose,
    Number(f64),
    /// Raw text between the quotes, escapes not yet processed.
    Text(&'code str),
    Identifier(&'code str),
    True,
    False,
    Null,
    This,
    Arrow,
    Comma,
    Colon,
    Dot,
    QuestionDot,
    Question,
    StrictEqual,
    StrictNotEqual,
    Equal,
    NotEqual,
    LessOrEqual,
    Less,
    GreaterOrEqual,
    Greater,
    And,
    Or,
    Nullish,
    Bang,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
}

impl<'code> Token<'code> {
    pub fn into_cow_str(self) -> Cow<'code, str> {
        match self {
            Self::ParenOpen => "(".into(),
            Self::ParenClose => ")".into(),
            Self::BraceOpen => "{".into(),
            Self::BraceClose => "}".into(),
            Self::BracketOpen => "[".into(),
            Self::BracketClose => "]".into(),
            Self::Number(number) => number.to_string().into(),
            Self::Text(text) => format!("'{text}'").into(),
            Self::Identifier(identifier) => identifier.into(),
            Self::True => "true".into(),
            Self::False => "false".into(),
            Self::Null => "null".into(),
            Self::This => "this".into(),
            Self::Arrow => "=>".into(),
            Self::Comma => ",".into(),
            Self::Colon => ":".into(),
            Self::Dot => ".".into(),
            Self::QuestionDot => "?.".into(),
            Self::Question => "?".into(),
            Self::StrictEqual => "===".into(),
            Self::StrictNotEqual => "!==".into(),
            Self::Equal => "==".into(),
            Self::NotEqual => "!=".into(),
            Self::LessOrEqual => "<=".into(),
            Self::Less => "<".into(),
            Self::GreaterOrEqual => ">=".into(),
            Self::Greater => ">".into(),
            Self::And => "&&".into(),
            Self::Or => "||".into(),
            Self::Nullish => "??".into(),
            Self::Bang => "!".into(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Asterisk => "*".into(),
            Self::Slash => "/".into(),
            Self::Percent => "%".into(),
        }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.into_cow_str())
    }
}

pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<Spanned<Token<'code>>>, extra::Err<ParseError<'code, char>>> {
    let bracket = choice((
        just('(').to(Token::ParenOpen),
        just(')').to(Token::ParenClose),
        just('{').to(Token::BraceOpen),
        just('}').to(Token::BraceClose),
        just('[').to(Token::BracketOpen),
        just(']').to(Token::BracketClose),
    ));

    // Longest operators first.
    let operator = choice((
        just("===").to(Token::StrictEqual),
        just("!==").to(Token::StrictNotEqual),
        just("=>").to(Token::Arrow),
        just("==").to(Token::Equal),
        just("!=").to(Token::NotEqual),
        just("<=").to(Token::LessOrEqual),
        just(">=").to(Token::GreaterOrEqual),
        just("&&").to(Token::And),
        just("||").to(Token::Or),
        just("??").to(Token::Nullish),
        just("?.").to(Token::QuestionDot),
    ));

    let single_char_operator = choice((
        just('<').to(Token::Less),
        just('>').to(Token::Greater),
        just('?').to(Token::Question),
        just('!').to(Token::Bang),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Asterisk),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just(',').to(Token::Comma),
        just(':').to(Token::Colon),
        just('.').to(Token::Dot),
    ));

    // Sign is a prefix operator, not part of the literal.
    let number = text::int(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Number);

    let escape = just('\\').then(any()).ignored();
    let single_quoted = just('\'')
        .ignore_then(
            escape
                .clone()
                .or(none_of("\\'").ignored())
                .repeated()
                .to_slice(),
        )
        .then_ignore(just('\''));
    let double_quoted = just('"')
        .ignore_then(
            escape
                .or(none_of("\\\"").ignored())
                .repeated()
                .to_slice(),
        )
        .then_ignore(just('"'));
    let text = single_quoted.or(double_quoted).map(Token::Text);

    let identifier_or_keyword = any()
        .filter(|character: &char| {
            character.is_ascii_alphabetic() || *character == '_' || *character == '$'
        })
        .then(
            any()
                .filter(|character: &char| {
                    character.is_ascii_alphanumeric() || *character == '_' || *character == '$'
                })
                .repeated(),
        )
        .to_slice()
        .map(|identifier: &str| match identifier {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "this" => Token::This,
            _ => Token::Identifier(identifier),
        });

    let token = choice((
        bracket,
        number,
        text,
        operator,
        single_char_operator,
        identifier_or_keyword,
    ));

    token
        .map_with(|token, extra| Spanned {
            node: token,
            span: extra.span(),
        })
        .padded()
        .recover_with(skip_then_retry_until(any().ignored(), end()))
        .repeated()
        .collect()
}

/// Processes backslash escapes of a raw string literal.
pub fn unescape(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    let mut characters = raw.chars();
    while let Some(character) = characters.next() {
        if character != '\\' {
            output.push(character);
            continue;
        }
        match characters.next() {
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some('r') => output.push('\r'),
            Some('0') => output.push('\0'),
            Some('u') => {
                let code: String = characters.by_ref().take(4).collect();
                match u32::from_str_radix(&code, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => output.push(decoded),
                    None => {
                        output.push('u');
                        output.push_str(&code);
                    }
                }
            }
            Some(other) => output.push(other),
            None => output.push('\\'),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::prelude::Parser;

    fn tokens(source: &str) -> Vec<Token<'_>> {
        let result = lexer().parse(source);
        result
            .output()
            .unwrap()
            .iter()
            .map(|token| token.node)
            .collect()
    }

    #[test]
    fn test_operators_prefer_longest_match() {
        assert_eq!(
            tokens("a === b !== c == d => e"),
            vec![
                Token::Identifier("a"),
                Token::StrictEqual,
                Token::Identifier("b"),
                Token::StrictNotEqual,
                Token::Identifier("c"),
                Token::Equal,
                Token::Identifier("d"),
                Token::Arrow,
                Token::Identifier("e"),
            ]
        );
    }

    #[test]
    fn test_keywords_and_literals() {
        assert_eq!(
            tokens("this.items[0] ?? null ? 'x' : \"y\""),
            vec![
                Token::This,
                Token::Dot,
                Token::Identifier("items"),
                Token::BracketOpen,
                Token::Number(0.0),
                Token::BracketClose,
                Token::Nullish,
                Token::Null,
                Token::Question,
                Token::Text("x"),
                Token::Colon,
                Token::Text("y"),
            ]
        );
    }

    #[test]
    fn test_escaped_quote_stays_inside_text() {
        assert_eq!(tokens(r"'it\'s'"), vec![Token::Text(r"it\'s")]);
        assert_eq!(unescape(r"it\'s\nA"), "it's\nA");
    }

    #[test]
    fn test_spans_point_into_source() {
        let result = lexer().parse("  1.5 + x");
        let spans: Vec<_> = result
            .output()
            .unwrap()
            .iter()
            .map(|token| token.span.into_range())
            .collect();
        assert_eq!(spans, vec![2..5, 6..7, 8..9]);
    }
}
