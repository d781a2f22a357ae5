//! Case-insensitive substring matching of trigger words.

/// Full Unicode default case folding, so `STRASSE` and `straße` compare
/// equal where plain lowercasing would not.
pub fn fold_case(text: &str) -> String {
    caseless::default_case_fold_str(text)
}

/// True if any trigger word occurs anywhere in `text`, ignoring case.
/// An empty trigger list never matches.
pub fn matches<S: AsRef<str>>(text: &str, trigger_words: &[S]) -> bool {
    if trigger_words.is_empty() {
        return false;
    }
    let haystack = fold_case(text);
    trigger_words
        .iter()
        .any(|word| haystack.contains(&fold_case(word.as_ref())))
}

/// Trigger words folded once up front, for matching many items.
#[derive(Debug, Clone, Default)]
pub struct TriggerMatcher {
    folded: Vec<String>,
}

impl TriggerMatcher {
    pub fn new<S: AsRef<str>>(trigger_words: &[S]) -> Self {
        Self {
            folded: trigger_words
                .iter()
                .map(|w| fold_case(w.as_ref()))
                .collect(),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        if self.folded.is_empty() {
            return false;
        }
        let haystack = fold_case(text);
        self.folded.iter().any(|word| haystack.contains(word))
    }

    pub fn is_match_any<'a>(&self, texts: impl IntoIterator<Item = &'a str>) -> bool {
        texts.into_iter().any(|text| self.is_match(text))
    }
}
