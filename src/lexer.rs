//! PQL 的词法分析器

use std::borrow::Cow;

use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    /// 跳过空白字符
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn token(&self, kind: TokenKind<'a>, start: usize) -> Token<'a> {
        Token { kind, span: Span::new(start, self.position) }
    }

    /// 读取数字字面量，支持可选的负号和小数部分
    /// 注意：负号（如果有）已经被调用者消费
    fn read_number(&mut self, start: usize) -> Token<'a> {
        self.consume_digits();
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            self.consume_digits();
        }

        let value_str = &self.input[start..self.position];
        let kind = if is_float {
            value_str.parse::<f64>().map(TokenKind::Float).unwrap_or(TokenKind::Illegal)
        } else {
            // 溢出的整数被视为非法字面量
            value_str.parse::<i64>().map(TokenKind::Integer).unwrap_or(TokenKind::Illegal)
        };
        self.token(kind, start)
    }

    fn consume_digits(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// 读取单引号或双引号包围的字符串字面量，支持反斜杠转义
    /// 注意：开始的引号已经被调用者消费
    fn read_string(&mut self, start: usize, quote: char) -> Token<'a> {
        let content_start = self.position;
        let mut owned: Option<String> = None;

        loop {
            let Some(c) = self.bump() else {
                return self.token(TokenKind::UnterminatedString, start);
            };
            if c == quote {
                break;
            }
            if c == '\\' {
                let escaped_at = self.position - 1;
                let Some(escaped) = self.bump() else {
                    return self.token(TokenKind::UnterminatedString, start);
                };
                // 第一次遇到转义时才分配
                let buffer = owned
                    .get_or_insert_with(|| self.input[content_start..escaped_at].to_string());
                buffer.push(escaped);
            } else if let Some(buffer) = owned.as_mut() {
                buffer.push(c);
            }
        }

        let content = match owned {
            Some(buffer) => Cow::Owned(buffer),
            None => Cow::Borrowed(&self.input[content_start..self.position - quote.len_utf8()]),
        };
        self.token(TokenKind::String(content), start)
    }

    /// 读取标识符
    /// 标识符可以包含字母、数字、下划线和点（用于限定字段名，如 `donor.gender`）
    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.bump();
            } else {
                break;
            }
        }
        let literal = &self.input[start..self.position];
        self.token(TokenKind::Identifier(literal), start)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.position;

        let Some(c) = self.bump() else {
            return None; // 到达输入末尾
        };

        let token = match c {
            '(' => self.token(TokenKind::LParen, start),
            ')' => self.token(TokenKind::RParen, start),
            ',' => self.token(TokenKind::Comma, start),
            '*' => self.token(TokenKind::Star, start),
            '+' => self.token(TokenKind::Plus, start),
            '-' => {
                if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.read_number(start)
                } else {
                    self.token(TokenKind::Minus, start)
                }
            }
            '\'' | '"' => self.read_string(start, c),
            c if c.is_ascii_digit() => self.read_number(start),
            c if c.is_alphabetic() || c == '_' => self.read_identifier(start),
            _ => self.token(TokenKind::Illegal, start),
        };
        Some(token)
    }
}
