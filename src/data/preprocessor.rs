// ============================================================
// Layer 4 - Line Preprocessor
// ============================================================
// Normalises one line of a tokenized corpus before it is split
// into tokens on single spaces.
//
// Corpus files often contain:
//   - Tabs and non-breaking spaces from editors
//   - Zero-width spaces and byte order marks
//   - Carriage returns from Windows line endings
//   - Runs of several spaces
//
// Left alone, these produce empty tokens or tokens that differ
// only in invisible characters and waste vocabulary slots.
//
// Cleaning steps (applied in order):
//   1. Map Unicode whitespace variants and control chars to space
//   2. Collapse runs of spaces into one, trim both ends
//   3. Optionally lowercase

#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    lowercase: bool,
}

impl Preprocessor {
    /// Create a new Preprocessor instance
    pub fn new(lowercase: bool) -> Self {
        Self { lowercase }
    }

    /// Clean one corpus line. Takes a &str and returns an owned String.
    pub fn clean(&self, line: &str) -> String {

        // ── Step 1: Normalise individual characters ───────────────────────────
        let mapped = line.chars().map(|c| match c {
            '\t' | '\r' | '\n'              => ' ',
            '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
            c if c.is_control()             => ' ',
            c                               => c,
        });

        // ── Step 2: Collapse runs of spaces ───────────────────────────────────
        let mut out        = String::with_capacity(line.len());
        let mut last_space = true;
        for c in mapped {
            if c == ' ' {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }
        let trimmed = out.trim_end();

        // ── Step 3: Case ──────────────────────────────────────────────────────
        if self.lowercase {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        }
    }

    /// Clean a line and split it into tokens on single spaces.
    /// An empty line yields an empty sentence.
    pub fn tokenize(&self, line: &str) -> Vec<String> {
        let clean = self.clean(line);
        if clean.is_empty() {
            return Vec::new();
        }
        clean.split(' ').map(str::to_string).collect()
    }
}
