// EN: src/core/arg_parser.rs

/// A single classified command-line token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgToken<'a> {
    /// A bare word: a command name, an option value or a free argument.
    Word(&'a str),
    /// `--name` or `--name=value`.
    Long {
        name: &'a str,
        inline: Option<&'a str>,
    },
    /// `-n` or `-n=value`.
    Short {
        name: &'a str,
        inline: Option<&'a str>,
    },
    /// A lone `--`; every following token is a free argument.
    Separator,
}

impl ArgToken<'_> {
    /// Renders the token back to the form the user typed, for error messages.
    pub fn display(&self) -> String {
        match self {
            ArgToken::Word(w) => w.to_string(),
            ArgToken::Long { name, inline: None } => format!("--{}", name),
            ArgToken::Long {
                name,
                inline: Some(v),
            } => format!("--{}={}", name, v),
            ArgToken::Short { name, inline: None } => format!("-{}", name),
            ArgToken::Short {
                name,
                inline: Some(v),
            } => format!("-{}={}", name, v),
            ArgToken::Separator => "--".to_string(),
        }
    }
}

/// A forward-only cursor over classified arguments.
///
/// # Logic:
/// - `--name` / `--name=value` is a long option, `-n` / `-n=value` a short one.
/// - A dash followed by a digit (`-1`, `-0.5`) is a word, so negative numbers
///   can be passed as option values.
/// - After a lone `--` everything is a word.
#[derive(Debug, Clone)]
pub struct ArgCursor<'a> {
    tokens: Vec<ArgToken<'a>>,
    position: usize,
}

impl<'a> ArgCursor<'a> {
    pub fn new(args: &'a [String]) -> Self {
        let mut tokens = Vec::with_capacity(args.len());
        let mut after_separator = false;

        for arg in args.iter().map(String::as_str) {
            if after_separator {
                tokens.push(ArgToken::Word(arg));
                continue;
            }
            let token = classify(arg);
            if token == ArgToken::Separator {
                after_separator = true;
            }
            tokens.push(token);
        }

        Self {
            tokens,
            position: 0,
        }
    }

    pub fn peek(&self) -> Option<ArgToken<'a>> {
        self.tokens.get(self.position).copied()
    }

    pub fn advance(&mut self) -> Option<ArgToken<'a>> {
        let token = self.peek()?;
        self.position += 1;
        Some(token)
    }

    /// Consumes the next token only if it is a word.
    pub fn next_word(&mut self) -> Option<&'a str> {
        match self.peek() {
            Some(ArgToken::Word(w)) => {
                self.position += 1;
                Some(w)
            }
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.tokens.len()
    }
}

fn classify(arg: &str) -> ArgToken<'_> {
    if arg == "--" {
        return ArgToken::Separator;
    }
    if let Some(rest) = arg.strip_prefix("--") {
        let (name, inline) = split_inline(rest);
        return ArgToken::Long { name, inline };
    }
    if let Some(rest) = arg.strip_prefix('-') {
        if rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return ArgToken::Word(arg);
        }
        let (name, inline) = split_inline(rest);
        return ArgToken::Short { name, inline };
    }
    ArgToken::Word(arg)
}

fn split_inline(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (rest, None),
    }
}
