// Shell-style glob matching for cue names.  A pattern is matched against the
// whole name: `*` (any run, including separators), `?` (any single char) and
// `[set]` classes.  Patterns attached to listener sessions are compiled once
// here and reused for every delivered cue.

use globset::GlobBuilder;

#[derive(Debug, Clone)]
pub struct CuePattern {
    source: String,
    matcher: globset::GlobMatcher,
}

impl CuePattern {
    pub fn compile(source: &str) -> Result<Self, globset::Error> {
        let glob = GlobBuilder::new(source)
            .literal_separator(false)
            .backslash_escape(true)
            .build()?;
        Ok(Self {
            source: source.to_owned(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
