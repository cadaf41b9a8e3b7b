//! Parser states and processing modes (spec.md §4.1).
//!
//! The original "state" object is a plain-data vtable with optional
//! callbacks; per spec.md §9's own design note, this becomes a plain enum
//! here rather than a trait-object hierarchy -- there is a closed,
//! small set of "what is the parser waiting for next" situations, and an
//! enum makes the transition table in [`crate::commands`] exhaustive and
//! checkable by the compiler.

/// The parser's current processing mode (spec.md §3 "Parser machine").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    /// Skipping characters looking for `!label!`, set by an `Olabel$`
    /// whose target hasn't been seen yet.
    ParseOnlyGoto(String),
    /// Skipping to the matching `>`, because a loop's initial count was 0
    /// or `;` broke out of it. `anchor` is the program counter of the
    /// character right after the loop's opening `<`; `depth` counts
    /// nested `<` seen since, so the matching `>` is found incrementally,
    /// one keystroke at a time, which works whether the macro text is
    /// already fully known (file/`Mq` macros) or is still being typed
    /// (the top-level command line).
    ParseOnlyLoop { anchor: usize, depth: u32 },
    /// Skipping to `|` (then back to `Normal`) or to `'` at depth 0,
    /// because a conditional's test was false. `anchor` is the program
    /// counter right after the conditional's type character; `depth`
    /// counts nested `"` seen since.
    ParseOnlyCond { anchor: usize, depth: u32 },
    /// Like `ParseOnlyCond` but skips straight to `'`, ignoring any `|`
    /// (used once the `|` arm itself has already run).
    ParseOnlyCondForce { anchor: usize, depth: u32 },
    /// Classifying characters for syntax highlighting without executing
    /// them.
    Lexing,
}

impl Mode {
    pub fn is_executing(&self) -> bool {
        matches!(self, Mode::Normal)
    }

    pub fn is_parse_only(&self) -> bool {
        !matches!(self, Mode::Normal | Mode::Lexing)
    }
}

/// What the top-level dispatcher is currently waiting for (spec.md §4.1,
/// §9 "deep inheritance of states" -- `expectstring`/`expectfile`/
/// `expectdir` collapse into the one `ExpectString` variant parameterised
/// by what happens to the built text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Top-level dispatch: every character is a fresh command.
    Start,
    /// Just saw `^`; the next character selects the control command.
    Control,
    /// Just saw ESC; the next character decides between `$$` (macro
    /// return) and "discard args then re-dispatch at Start".
    Escape,
    /// Just saw an `@`-modified command that takes a string argument: the
    /// very next character becomes the alternate string delimiter (spec.md
    /// §4.1 lines 89, 97) instead of being collected as text.
    ExpectStringDelim {
        command: char,
        build: bool,
        raw: String,
    },
    /// Collecting a string argument (e.g. for `I`, `S`, `O`, `FS`) until
    /// an unescaped occurrence of `delim` (ESC, unless `@` picked an
    /// alternate delimiter), tagged with which command requested it and
    /// whether string-building is enabled (`EI` disables it).
    ExpectString {
        command: char,
        raw: String,
        build: bool,
        delim: char,
    },
    /// A second string argument is being collected (`FS`/`FR`'s
    /// replacement text, `ES`'s second operand, …), terminated by the
    /// same delimiter the first string argument used.
    ExpectString2 {
        command: char,
        first: String,
        raw: String,
        build: bool,
        delim: char,
    },
    /// Collecting a Q-Register reference for `command` (spec.md §4.4
    /// "Q-Register-spec sub-machine"): `raw` accumulates the characters
    /// seen so far (`.`, `#XY`, or a single name character) until they
    /// form a complete reference.
    ExpectQRegSpec { command: char, raw: String },
    /// Collecting a `"` conditional's type character.
    ExpectCondType,
    /// Collecting an `O` goto target, up to `$`. Distinguishes the
    /// computed-goto comma-list form at execution time.
    ExpectLabel { raw: String },
    /// Collecting a `!label!` declaration, up to the closing `!`.
    ExpectLabelDecl { raw: String },
    /// Just saw `E`; the next character selects the extended command
    /// (`EC`, `EG`, `EI`, `ES`, `EW`, `EB`, `EF`, `EX`, `EQ`, ...).
    ExtendedPrefix,
    /// Just saw `F`; the next character selects the flow-control
    /// shorthand (`F>`, `F<`, `F'`, `F|`).
    FlowPrefix,
    /// Collecting a `^A`-delimited message, up to the matching `^A`.
    ExpectMessage { raw: String },
    /// Just saw one or more `=`; deferred one character (spec.md §4.1
    /// line 121) to see whether another `=` follows before picking the
    /// print radix (`=` decimal, `==` octal, `===` hex).
    ExpectEquals { count: u8 },
}

impl Default for State {
    fn default() -> Self {
        State::Start
    }
}
