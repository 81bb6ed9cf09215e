use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sym {
    Id,
    Str,
    Number,
    True,
    False,
    Null,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Inc,
    Dec,

    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    Not,
    And,
    Or,

    Question,
    NullSafe,
    Colon,
    StaticMember,
    Dot,
    Range,
    Comma,
    Semicolon,

    LParen,
    RParen,
    LBrack,
    RBrack,
    LBrace,
    RBrace,

    Eof,
}

impl Sym {
    pub(crate) const fn describe(self) -> &'static str {
        match self {
            Self::Id => "identifier",
            Self::Str => "string",
            Self::Number => "number",
            Self::True => "'true'",
            Self::False => "'false'",
            Self::Null => "'null'",
            Self::Add => "'+'",
            Self::Sub => "'-'",
            Self::Mul => "'*'",
            Self::Div => "'/'",
            Self::Mod => "'%'",
            Self::Inc => "'++'",
            Self::Dec => "'--'",
            Self::Assign => "'='",
            Self::Eq => "'=='",
            Self::Ne => "'!='",
            Self::Lt => "'<'",
            Self::Le => "'<='",
            Self::Gt => "'>'",
            Self::Ge => "'>='",
            Self::Not => "'!'",
            Self::And => "'&&'",
            Self::Or => "'||'",
            Self::Question => "'?'",
            Self::NullSafe => "'??'",
            Self::Colon => "':'",
            Self::StaticMember => "'::'",
            Self::Dot => "'.'",
            Self::Range => "'..'",
            Self::Comma => "','",
            Self::Semicolon => "';'",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::LBrack => "'['",
            Self::RBrack => "']'",
            Self::LBrace => "'{'",
            Self::RBrace => "'}'",
            Self::Eof => "end of expression",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tok {
    pub(crate) sym: Sym,
    /// Identifier name, string content, or the raw spelling of a number.
    pub(crate) text: String,
    /// Typed payload of a number token.
    pub(crate) number: Option<Value>,
    pub(crate) row: usize,
}

impl Tok {
    pub(crate) const fn new(sym: Sym, text: String, row: usize) -> Self {
        Self {
            sym,
            text,
            number: None,
            row,
        }
    }

    pub(crate) fn describe(&self) -> String {
        if matches!(self.sym, Sym::Id | Sym::Number) {
            format!("'{}'", self.text)
        } else if self.sym == Sym::Str {
            format!("\"{}\"", self.text)
        } else {
            self.sym.describe().to_owned()
        }
    }
}
