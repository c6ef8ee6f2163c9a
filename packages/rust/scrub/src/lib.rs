//! Boilerplate removal for extracted manual text.
//!
//! The scrubber deletes every literal occurrence of a fixed phrase list,
//! then strips surrounding whitespace. Phrases are matched as plain
//! substrings, never as patterns.

use manualforge_shared::DEFAULT_SCRUB_PHRASES;
use tracing::trace;

/// Ordered list of phrases removed from extracted text.
#[derive(Debug, Clone)]
pub struct Scrubber {
    phrases: Vec<String>,
}

impl Default for Scrubber {
    fn default() -> Self {
        Self::new(DEFAULT_SCRUB_PHRASES.iter().copied())
    }
}

impl Scrubber {
    /// Build a scrubber from `phrases`, applied in the given order.
    /// Empty phrases are dropped.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let phrases = phrases
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.is_empty())
            .collect();
        Self { phrases }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Remove every phrase occurrence and trim the result.
    ///
    /// Removal repeats until the text stops changing, so a deletion that
    /// splices a new occurrence together is caught too and
    /// `scrub(scrub(t)) == scrub(t)` holds.
    pub fn scrub(&self, text: &str) -> String {
        let mut current = text.to_string();
        loop {
            let next = self.remove_pass(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current.trim().to_string()
    }

    fn remove_pass(&self, text: &str) -> String {
        let mut result = text.to_string();
        for phrase in &self.phrases {
            if result.contains(phrase.as_str()) {
                trace!(phrase = %phrase, "removing boilerplate");
                result = result.replace(phrase.as_str(), "");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_default_boilerplate() {
        let text = "Evaluation Warning : The document was created with Spire.PDF for Python.\n\
                    Replace the brake pads\nCLUB.AUTODOC.CO.UK\nWELL DONE!\n";
        let scrubbed = Scrubber::default().scrub(text);
        assert_eq!(scrubbed, "Replace the brake pads");
    }

    #[test]
    fn autodoc_removed_next_to_punctuation() {
        let scrubber = Scrubber::new(["AUTODOC"]);
        let scrubbed = scrubber.scrub("(AUTODOC), AUTODOC. AUTODOC!AUTODOC");
        assert!(!scrubbed.contains("AUTODOC"));
        assert_eq!(scrubbed, "(), . !");
    }

    #[test]
    fn matching_is_literal_not_regex() {
        let scrubber = Scrubber::new(["WELL DONE!", "Spire.PDF"]);
        assert_eq!(scrubber.scrub("WELL DONE?"), "WELL DONE?");
        assert_eq!(scrubber.scrub("SpireXPDF"), "SpireXPDF");
        assert_eq!(scrubber.scrub("a Spire.PDF b"), "a  b");
    }

    #[test]
    fn spliced_occurrences_are_removed() {
        let scrubber = Scrubber::new(["AUTODOC"]);
        let scrubbed = scrubber.scrub("AUTOAUTODOCDOC tail");
        assert_eq!(scrubbed, "tail");
    }

    #[test]
    fn scrub_is_idempotent() {
        let scrubber = Scrubber::default();
        for text in [
            "  AUTODOC manual SIMILAR VIDEO TUTORIAL  ",
            "CLUB.AUTODOC.CO.UK",
            "Buy toolsBuy tools\n\nStep 1",
            "plain text",
            "",
        ] {
            let once = scrubber.scrub(text);
            assert_eq!(scrubber.scrub(&once), once, "not idempotent for {text:?}");
        }
    }

    #[test]
    fn phrase_order_is_respected() {
        // Default order removes the full domain before its AUTODOC fragment.
        let scrubber = Scrubber::default();
        assert_eq!(scrubber.scrub("see CLUB.AUTODOC.CO.UK"), "see");

        let reversed = Scrubber::new(["AUTODOC", "CLUB.AUTODOC.CO.UK"]);
        assert_eq!(reversed.scrub("see CLUB.AUTODOC.CO.UK"), "see CLUB..CO.UK");
    }

    #[test]
    fn empty_phrases_are_ignored() {
        let scrubber = Scrubber::new(["", "X"]);
        assert_eq!(scrubber.phrases(), ["X".to_string()]);
        assert_eq!(scrubber.scrub(" aXb "), "ab");
    }
}
