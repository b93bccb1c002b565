//! Generic state-machine lexer framework.
//!
//! The framework owns cursor movement, item emission, and the run loop;
//! it knows nothing about any grammar. A concrete grammar (see
//! [`crate::bracket`]) supplies state functions: each one scans some input
//! and returns either the next state function or [`NextState::Done`].
//! Scanning ends when a state returns `Done`, which `error` does after
//! emitting a terminal error item.
//!
//! Positions are byte offsets into the source; cursor movement is
//! UTF-8-aware (`next`/`backup` step whole characters).

/// A single lexed item. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<K> {
    pub kind: K,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Present only on terminal error items.
    pub message: Option<String>,
}

/// A state function: scans from the current cursor and hands back control.
pub type StateFn<K, D> = fn(&mut Lexer<'_, K, D>) -> NextState<K, D>;

/// What a state function returns: the next state, or the terminal marker.
pub enum NextState<K, D> {
    To(StateFn<K, D>),
    Done,
}

/// One lexing run over a source string.
///
/// `depth` and `data` are scratch space for the grammar's state functions;
/// the framework never reads them.
pub struct Lexer<'a, K, D> {
    source: &'a str,
    /// Start of the slice that the next `emit` will flush.
    pub start: usize,
    /// Current cursor (byte offset).
    pub pos: usize,
    /// Grammar-owned nesting depth.
    pub depth: i32,
    /// Grammar-owned scratch data.
    pub data: D,
    items: Vec<Item<K>>,
}

impl<'a, K: Copy, D> Lexer<'a, K, D> {
    /// Run `initial` to completion over `source` and return the item queue.
    ///
    /// The initial state is a required constructor argument, so a lexer
    /// without a grammar is unrepresentable.
    pub fn run(source: &'a str, initial: StateFn<K, D>, data: D) -> Vec<Item<K>> {
        let mut lexer = Lexer {
            source,
            start: 0,
            pos: 0,
            depth: 0,
            data,
            items: Vec::new(),
        };
        let mut state = NextState::To(initial);
        while let NextState::To(f) = state {
            state = f(&mut lexer);
        }
        lexer.items
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    /// Consume and return the next character, or `None` at end of input.
    /// The cursor never moves past the end.
    pub fn next(&mut self) -> Option<char> {
        let c = self.source[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Inspect the next character without consuming it.
    pub fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    /// Move the cursor back `n` characters (saturating at the emission point
    /// would be a grammar bug; saturates at 0).
    pub fn backup(&mut self, n: usize) {
        for _ in 0..n {
            match self.source[..self.pos].chars().next_back() {
                Some(c) => self.pos -= c.len_utf8(),
                None => break,
            }
        }
    }

    /// Move the cursor forward `n` characters, stopping at end of input.
    pub fn forward(&mut self, n: usize) {
        for _ in 0..n {
            if self.next().is_none() {
                break;
            }
        }
    }

    /// Consume one character if it is in `set`. Returns whether it was.
    pub fn accept(&mut self, set: &str) -> bool {
        match self.peek() {
            Some(c) if set.contains(c) => {
                self.forward(1);
                true
            }
            _ => false,
        }
    }

    /// Consume characters while they are in `set`. Returns how many.
    pub fn accept_run(&mut self, set: &str) -> usize {
        self.accept_while(|c| set.contains(c))
    }

    /// Consume one character if `pred` holds for it.
    pub fn accept_if(&mut self, pred: impl Fn(char) -> bool) -> bool {
        match self.peek() {
            Some(c) if pred(c) => {
                self.forward(1);
                true
            }
            _ => false,
        }
    }

    /// Consume characters while `pred` holds. Returns how many.
    pub fn accept_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        let mut n = 0;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.forward(1);
            n += 1;
        }
        n
    }

    /// Flush the slice between the emission point and the cursor as a new
    /// item and advance the emission point.
    pub fn emit(&mut self, kind: K) {
        self.items.push(Item {
            kind,
            text: self.source[self.start..self.pos].to_string(),
            start: self.start,
            end: self.pos,
            message: None,
        });
        self.start = self.pos;
    }

    /// Discard the pending slice without emitting.
    pub fn ignore(&mut self) {
        self.start = self.pos;
    }

    /// Emit a terminal error item and stop the state machine. State
    /// functions use this as `return lexer.error(kind, "...")`.
    pub fn error(&mut self, kind: K, message: impl Into<String>) -> NextState<K, D> {
        self.items.push(Item {
            kind,
            text: self.source[self.start..self.pos].to_string(),
            start: self.start,
            end: self.pos,
            message: Some(message.into()),
        });
        NextState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Word,
        Space,
        Bad,
    }

    fn words(lx: &mut Lexer<'_, Kind, ()>) -> NextState<Kind, ()> {
        if lx.at_end() {
            return NextState::Done;
        }
        if lx.accept_while(|c| c.is_ascii_alphabetic()) > 0 {
            lx.emit(Kind::Word);
            return NextState::To(words);
        }
        if lx.accept_run(" ") > 0 {
            lx.emit(Kind::Space);
            return NextState::To(words);
        }
        lx.forward(1);
        lx.error(Kind::Bad, "unexpected character")
    }

    #[test]
    fn emits_slices_between_emission_points() {
        let items = Lexer::run("ab cd", words, ());
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].kind, Kind::Word);
        assert_eq!(items[0].text, "ab");
        assert_eq!((items[0].start, items[0].end), (0, 2));
        assert_eq!(items[1].kind, Kind::Space);
        assert_eq!(items[2].text, "cd");
        assert_eq!((items[2].start, items[2].end), (3, 5));
    }

    #[test]
    fn error_is_terminal() {
        let items = Lexer::run("ab!cd", words, ());
        assert_eq!(items.last().unwrap().kind, Kind::Bad);
        assert_eq!(
            items.last().unwrap().message.as_deref(),
            Some("unexpected character")
        );
        // Nothing after the error item: "cd" was never scanned.
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn backup_and_forward_are_char_aware() {
        fn probe(lx: &mut Lexer<'_, Kind, ()>) -> NextState<Kind, ()> {
            lx.forward(2); // past "h" and the two-byte "é"
            lx.backup(1);
            lx.emit(Kind::Word);
            NextState::Done
        }
        let items = Lexer::run("héllo", probe, ());
        assert_eq!(items[0].text, "h");
        assert_eq!((items[0].start, items[0].end), (0, 1));
    }

    #[test]
    fn accept_consumes_only_matching() {
        fn probe(lx: &mut Lexer<'_, Kind, ()>) -> NextState<Kind, ()> {
            assert!(lx.accept("ab"));
            assert!(!lx.accept("xy"));
            lx.emit(Kind::Word);
            NextState::Done
        }
        let items = Lexer::run("aq", probe, ());
        assert_eq!(items[0].text, "a");
    }

    #[test]
    fn cursor_saturates_at_both_ends() {
        fn probe(lx: &mut Lexer<'_, Kind, ()>) -> NextState<Kind, ()> {
            lx.backup(5);
            assert_eq!(lx.pos, 0);
            lx.forward(99);
            assert!(lx.at_end());
            assert_eq!(lx.next(), None);
            lx.emit(Kind::Word);
            NextState::Done
        }
        let items = Lexer::run("xy", probe, ());
        assert_eq!(items[0].text, "xy");
    }
}
