// Byte-level JSON value boundary scanner.
//
// Used by the streaming array decoder to find where one element ends without
// parsing it. The buffer is only a prefix of the stream, so the scanner
// distinguishes "ran out of bytes" (`Incomplete`, read more and call again)
// from "these bytes can never be JSON" (`Invalid`).
//
// The scanner is an explicit state machine: nesting lives on a heap stack
// capped at `MAX_DEPTH`, and every call resumes where the previous one ran
// out of bytes, so an element that arrives in many reads is scanned once.

/// Deepest container nesting accepted. Same as `serde_json`'s recursion
/// limit; anything deeper could not be deserialized afterwards anyway.
pub(crate) const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanError {
    Incomplete,
    Invalid,
    TooDeep,
}

#[inline]
pub(crate) fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    let len = bytes.len();
    while i < len {
        match bytes[i] {
            b' ' | b'\n' | b'\r' | b'\t' => i += 1,
            _ => break,
        }
    }
    i
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the next significant byte outside a token may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    /// Right after `[`.
    ValueOrClose,
    /// Right after `{`.
    KeyOrClose,
    Key,
    Colon,
    CommaOrClose,
}

/// Progress through a number, following the JSON grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberPhase {
    Minus,
    Zero,
    Int,
    Dot,
    Frac,
    ExpMark,
    ExpSign,
    Exp,
}

impl NumberPhase {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Zero | Self::Int | Self::Frac | Self::Exp)
    }

    /// `Ok(None)` when `byte` is not part of the number and the number is
    /// complete without it.
    fn advance(self, byte: u8) -> Result<Option<Self>, ScanError> {
        let next = match (self, byte) {
            (Self::Minus, b'0') => Self::Zero,
            (Self::Minus | Self::Int, b'1'..=b'9') | (Self::Int, b'0') => Self::Int,
            (Self::Zero | Self::Int, b'.') => Self::Dot,
            (Self::Dot | Self::Frac, b'0'..=b'9') => Self::Frac,
            (Self::Zero | Self::Int | Self::Frac, b'e' | b'E') => Self::ExpMark,
            (Self::ExpMark, b'+' | b'-') => Self::ExpSign,
            (Self::ExpMark | Self::ExpSign | Self::Exp, b'0'..=b'9') => Self::Exp,
            _ if self.is_terminal() => return Ok(None),
            _ => return Err(ScanError::Invalid),
        };
        Ok(Some(next))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    None,
    String { escaped: bool, key: bool },
    /// Bytes of `true`/`false`/`null` still to match.
    Literal { rest: &'static [u8] },
    Number(NumberPhase),
}

/// Finds the end of one JSON value that starts at offset zero of a growing
/// buffer.
///
/// Call [`scan`](Self::scan) with the whole buffer each time more bytes are
/// appended; bytes already examined are not looked at again. The buffer must
/// only grow between calls.
#[derive(Debug)]
pub(crate) struct ValueScanner {
    pos: usize,
    stack: Vec<Container>,
    expect: Expect,
    token: Token,
}

impl Default for ValueScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueScanner {
    pub(crate) fn new() -> Self {
        Self {
            pos: 0,
            stack: Vec::new(),
            expect: Expect::Value,
            token: Token::None,
        }
    }

    /// Return the index one past the end of the value (after optional
    /// leading whitespace).
    ///
    /// `at_eof` tells the scanner whether more bytes can still arrive; it only
    /// matters for a top-level number, whose end is ambiguous at the buffer
    /// edge.
    pub(crate) fn scan(&mut self, bytes: &[u8], at_eof: bool) -> Result<usize, ScanError> {
        while let Some(&byte) = bytes.get(self.pos) {
            if let Some(end) = self.step(byte)? {
                return Ok(end);
            }
        }
        match self.token {
            Token::Number(phase) if at_eof && phase.is_terminal() && self.stack.is_empty() => {
                Ok(self.pos)
            }
            _ => Err(ScanError::Incomplete),
        }
    }

    /// Feed the byte at `self.pos`. A number ends on the first byte that is
    /// not part of it, so that byte is left for the structural step.
    fn step(&mut self, byte: u8) -> Result<Option<usize>, ScanError> {
        match self.token {
            Token::String { escaped: true, key } => {
                self.pos += 1;
                self.token = Token::String { escaped: false, key };
                Ok(None)
            }
            Token::String { escaped: false, key } => {
                self.pos += 1;
                match byte {
                    b'"' => {
                        self.token = Token::None;
                        if key {
                            self.expect = Expect::Colon;
                            return Ok(None);
                        }
                        Ok(self.value_done())
                    }
                    b'\\' => {
                        self.token = Token::String { escaped: true, key };
                        Ok(None)
                    }
                    0x00..=0x1F => Err(ScanError::Invalid),
                    _ => Ok(None),
                }
            }
            Token::Literal { rest } => {
                if rest.first() != Some(&byte) {
                    return Err(ScanError::Invalid);
                }
                self.pos += 1;
                if rest.len() == 1 {
                    self.token = Token::None;
                    return Ok(self.value_done());
                }
                self.token = Token::Literal { rest: &rest[1..] };
                Ok(None)
            }
            Token::Number(phase) => {
                if let Some(next) = phase.advance(byte)? {
                    self.pos += 1;
                    self.token = Token::Number(next);
                    return Ok(None);
                }
                self.token = Token::None;
                Ok(self.value_done())
            }
            Token::None => self.structural(byte),
        }
    }

    fn structural(&mut self, byte: u8) -> Result<Option<usize>, ScanError> {
        if matches!(byte, b' ' | b'\n' | b'\r' | b'\t') {
            self.pos += 1;
            return Ok(None);
        }
        match (self.expect, byte) {
            (Expect::ValueOrClose, b']') | (Expect::KeyOrClose, b'}') => self.close(),
            (Expect::Value | Expect::ValueOrClose, _) => self.begin_value(byte),
            (Expect::KeyOrClose | Expect::Key, b'"') => {
                self.pos += 1;
                self.token = Token::String {
                    escaped: false,
                    key: true,
                };
                Ok(None)
            }
            (Expect::Colon, b':') => {
                self.pos += 1;
                self.expect = Expect::Value;
                Ok(None)
            }
            (Expect::CommaOrClose, _) => match (byte, self.stack.last()) {
                (b',', Some(Container::Object)) => {
                    self.pos += 1;
                    self.expect = Expect::Key;
                    Ok(None)
                }
                (b',', Some(Container::Array)) => {
                    self.pos += 1;
                    self.expect = Expect::Value;
                    Ok(None)
                }
                (b'}', Some(Container::Object)) | (b']', Some(Container::Array)) => self.close(),
                _ => Err(ScanError::Invalid),
            },
            _ => Err(ScanError::Invalid),
        }
    }

    fn begin_value(&mut self, byte: u8) -> Result<Option<usize>, ScanError> {
        self.token = match byte {
            b'"' => Token::String {
                escaped: false,
                key: false,
            },
            b'{' | b'[' => {
                if self.stack.len() >= MAX_DEPTH {
                    return Err(ScanError::TooDeep);
                }
                if byte == b'{' {
                    self.stack.push(Container::Object);
                    self.expect = Expect::KeyOrClose;
                } else {
                    self.stack.push(Container::Array);
                    self.expect = Expect::ValueOrClose;
                }
                Token::None
            }
            b't' => Token::Literal { rest: b"rue" },
            b'f' => Token::Literal { rest: b"alse" },
            b'n' => Token::Literal { rest: b"ull" },
            b'-' => Token::Number(NumberPhase::Minus),
            b'0' => Token::Number(NumberPhase::Zero),
            b'1'..=b'9' => Token::Number(NumberPhase::Int),
            _ => return Err(ScanError::Invalid),
        };
        self.pos += 1;
        Ok(None)
    }

    fn close(&mut self) -> Result<Option<usize>, ScanError> {
        self.pos += 1;
        self.stack.pop();
        Ok(self.value_done())
    }

    /// A value just ended: either the top-level one (done) or a member of
    /// the enclosing container.
    fn value_done(&mut self) -> Option<usize> {
        if self.stack.is_empty() {
            return Some(self.pos);
        }
        self.expect = Expect::CommaOrClose;
        None
    }
}
